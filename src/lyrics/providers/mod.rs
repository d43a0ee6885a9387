//! Upstream platform adapters.
//!
//! Each platform implements [`LyricSource`]; [`collect_candidates`] drives a
//! source through search, pre-ranking, download and decode so the
//! orchestrator only ever sees finished [`UpstreamCandidate`]s.

pub mod kugou;
pub mod lrclib;
pub mod musixmatch;
pub mod netease;
pub mod qq;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, GatewayConfig, SourceSettings};
use crate::lyrics::codec::{DecodeError, looks_like_plain_lrc};
use crate::lyrics::enrich::Translator;
use crate::lyrics::parse::{is_instrumental_body, parse_lrc};
use crate::lyrics::similarity::{artist_similarity, simplify_artist, title_similarity};
use crate::lyrics::types::{
    DecodedLyrics, LyricsError, LyricsQuery, RawPayload, SourceId, TrackHit, UpstreamCandidate,
    build_http_client, http_client,
};

const FETCH_ATTEMPTS: usize = 3;
const FETCH_BACKOFF: Duration = Duration::from_millis(500);

/// One upstream lyrics platform.
#[async_trait]
pub trait LyricSource: Send + Sync {
    fn id(&self) -> SourceId;

    /// Budget the orchestrator grants this source per request.
    fn timeout(&self) -> Duration;

    async fn search(&self, query: &LyricsQuery) -> Result<Vec<TrackHit>, LyricsError>;

    async fn fetch_lyrics(&self, hit: &TrackHit) -> Result<RawPayload, LyricsError>;

    /// Turn a downloaded payload into structured lines.
    fn decode(&self, hit: &TrackHit, payload: &RawPayload) -> Result<DecodedLyrics, DecodeError>;
}

/// Shared construction input for the platform adapters.
#[derive(Clone, Debug)]
pub struct SourceContext {
    pub client: Client,
    pub timeout: Duration,
}

impl SourceContext {
    fn from_settings(settings: &SourceSettings) -> Result<Self, ConfigError> {
        let client = match settings.proxy.as_deref() {
            Some(proxy) => build_http_client(Some(proxy)).map_err(|e| ConfigError::InvalidProxy {
                id: settings.id,
                reason: e.to_string(),
            })?,
            None => http_client().clone(),
        };
        Ok(Self {
            client,
            timeout: settings.effective_timeout(),
        })
    }
}

/// Instantiate the enabled adapters, in configuration order.
pub fn build_sources(config: &GatewayConfig) -> Result<Vec<Arc<dyn LyricSource>>, ConfigError> {
    let mut sources: Vec<Arc<dyn LyricSource>> = Vec::new();
    for settings in config.enabled_sources() {
        let ctx = SourceContext::from_settings(settings)?;
        let source: Arc<dyn LyricSource> = match settings.id {
            SourceId::Qq => Arc::new(qq::QqMusic::new(ctx)),
            SourceId::Kugou => Arc::new(kugou::Kugou::new(ctx)),
            SourceId::Netease => Arc::new(netease::Netease::new(ctx)),
            SourceId::Musixmatch => Arc::new(musixmatch::Musixmatch::new(ctx, config.musixmatch_token.clone())),
            SourceId::Lrclib => Arc::new(lrclib::Lrclib::new(ctx)),
        };
        sources.push(source);
    }
    Ok(sources)
}

/// Query variants to search with, most specific first: the Japanese
/// rendering of a romanized query when there is one, the original, then the
/// first credited artist when the credit lists several.
pub fn search_variants(query: &LyricsQuery, romaji: Option<LyricsQuery>) -> Vec<LyricsQuery> {
    let mut variants: Vec<LyricsQuery> = romaji.into_iter().collect();
    variants.push(query.clone());
    if let Some(first) = simplify_artist(&query.artist) {
        let mut simplified = query.clone();
        simplified.artist = first;
        variants.push(simplified);
    }
    variants
}

/// Title without artist, searched only when every other variant came back empty.
pub fn title_only_variant(query: &LyricsQuery) -> Option<LyricsQuery> {
    if query.title.trim().is_empty() || query.artist.trim().is_empty() {
        return None;
    }
    let mut variant = query.clone();
    variant.artist = String::new();
    Some(variant)
}

/// Ask `translator` for a Japanese rendering of an all-ASCII query, on the
/// chance that it is romanized Japanese. `None` when the query is not ASCII,
/// the translation fails, or nothing changed.
pub async fn romaji_variant(translator: &dyn Translator, query: &LyricsQuery) -> Option<LyricsQuery> {
    let ascii = |s: &str| s.chars().filter(|c| !c.is_whitespace()).all(|c| c.is_ascii());
    if query.title.trim().is_empty() || !ascii(&query.title) || !ascii(&query.artist) {
        return None;
    }
    let title = translator.translate(&query.title, "ja");
    let artist = async {
        if query.artist.trim().is_empty() {
            Ok(query.artist.clone())
        } else {
            translator.translate(&query.artist, "ja").await
        }
    };
    let (title, artist) = match futures_util::future::join(title, artist).await {
        (Ok(t), Ok(a)) => (t.trim().to_string(), a.trim().to_string()),
        (Err(e), _) | (_, Err(e)) => {
            tracing::debug!(title = %query.title, error = %e, "Romaji translation failed");
            return None;
        }
    };
    if title.is_empty() || (title == query.title.trim() && artist == query.artist.trim()) {
        return None;
    }
    tracing::info!(title = %title, artist = %artist, "Adding Japanese search variant");
    let mut variant = query.clone();
    variant.title = title;
    variant.artist = artist;
    Some(variant)
}

/// Cheap relevance estimate used to pick which hits are worth downloading.
pub fn prerank_score(query: &LyricsQuery, hit: &TrackHit) -> f64 {
    let mut score = title_similarity(&query.title, &hit.title) * 0.6
        + artist_similarity(&query.artist, &hit.artist) * 0.4;
    if let (Some(want), Some(have)) = (query.duration_ms(), hit.duration_ms)
        && want.abs_diff(have) <= 2000
    {
        score += 10.0;
    }
    score
}

/// Merge hits from several searches, dropping repeated track ids, and keep
/// the `limit` most relevant ones. A hit ranks by its best score against
/// any of `variants`.
pub fn select_hits(variants: &[LyricsQuery], batches: Vec<Vec<TrackHit>>, limit: usize) -> Vec<TrackHit> {
    let mut seen = HashSet::new();
    let mut hits: Vec<(f64, TrackHit)> = batches
        .into_iter()
        .flatten()
        .filter(|hit| seen.insert(hit.id.clone()))
        .map(|hit| {
            let best = variants
                .iter()
                .map(|q| prerank_score(q, &hit))
                .fold(0.0, f64::max);
            (best, hit)
        })
        .collect();
    hits.sort_by(|a, b| b.0.total_cmp(&a.0));
    hits.into_iter().take(limit).map(|(_, hit)| hit).collect()
}

async fn fetch_with_retry(source: &dyn LyricSource, hit: &TrackHit) -> Result<RawPayload, LyricsError> {
    let mut attempt = 1;
    loop {
        match source.fetch_lyrics(hit).await {
            Ok(payload) => return Ok(payload),
            Err(e) if e.is_transient() && attempt < FETCH_ATTEMPTS => {
                tracing::debug!(source = %source.id(), track = %hit.id, attempt, error = %e, "Retrying lyric fetch");
                tokio::time::sleep(FETCH_BACKOFF * attempt as u32).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn decode_payload(source: &dyn LyricSource, hit: &TrackHit, payload: &RawPayload) -> Result<DecodedLyrics, DecodeError> {
    // JSON envelopes can carry "[00:" early on; leave those to the adapter.
    let is_json = payload.content.trim_ascii_start().starts_with(b"{");
    if !is_json && looks_like_plain_lrc(&payload.content) {
        let text = String::from_utf8_lossy(&payload.content);
        return Ok(DecodedLyrics { lines: parse_lrc(&text) });
    }
    source.decode(hit, payload)
}

async fn search_all(
    source: &dyn LyricSource,
    variants: &[LyricsQuery],
    batches: &mut Vec<Vec<TrackHit>>,
) -> Option<LyricsError> {
    let results = join_all(variants.iter().map(|q| source.search(q))).await;
    let mut last_err = None;
    for result in results {
        match result {
            Ok(hits) => batches.push(hits),
            Err(e) => {
                tracing::warn!(source = %source.id(), error = %e, "Search failed");
                last_err = Some(e);
            }
        }
    }
    last_err
}

/// Run one source end to end over the search `variants` of one request.
///
/// When every search fails the source fails. When the searches succeed but
/// find nothing, a title-only search for `query` is the last resort.
/// Individual download or decode failures only drop that hit; an empty
/// download is kept as an instrumental candidate.
pub async fn collect_candidates(
    source: &dyn LyricSource,
    query: &LyricsQuery,
    variants: &[LyricsQuery],
    max_fetch: usize,
) -> Result<Vec<UpstreamCandidate>, LyricsError> {
    let id = source.id();
    let mut searched: Vec<LyricsQuery> = if variants.is_empty() {
        vec![query.clone()]
    } else {
        variants.to_vec()
    };

    let mut batches = Vec::with_capacity(searched.len());
    let last_err = search_all(source, &searched, &mut batches).await;
    if batches.is_empty()
        && let Some(e) = last_err
    {
        return Err(e);
    }
    if batches.iter().all(Vec::is_empty)
        && let Some(fallback) = title_only_variant(query)
    {
        tracing::debug!(source = %id, title = %fallback.title, "No hits, searching by title only");
        if let Some(e) = search_all(source, std::slice::from_ref(&fallback), &mut batches).await {
            tracing::debug!(source = %id, error = %e, "Title-only search failed");
        }
        searched.push(fallback);
    }

    let hits = select_hits(&searched, batches, max_fetch);
    tracing::debug!(source = %id, hits = hits.len(), "Fetching lyrics for top hits");

    let fetched = join_all(hits.iter().map(|hit| fetch_with_retry(source, hit))).await;

    let mut candidates = Vec::new();
    for (hit, fetched) in hits.into_iter().zip(fetched) {
        let payload = match fetched {
            Ok(p) if p.content.is_empty() => {
                tracing::debug!(source = %id, track = %hit.id, "Empty lyric payload, treating as instrumental");
                candidates.push(UpstreamCandidate {
                    source: id,
                    track_id: hit.id,
                    raw_payload: Vec::new(),
                    decoded: Some(DecodedLyrics::default()),
                    duration_ms: hit.duration_ms,
                    title_raw: hit.title,
                    artist_raw: hit.artist,
                    album_raw: hit.album,
                    is_instrumental: true,
                });
                continue;
            }
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(source = %id, track = %hit.id, error = %e, "Lyric fetch failed");
                continue;
            }
        };
        let decoded = match decode_payload(source, &hit, &payload) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(source = %id, track = %hit.id, error = %e, "Lyric decode failed");
                continue;
            }
        };
        let is_instrumental = hit.instrumental || is_instrumental_body(&decoded.lines);
        candidates.push(UpstreamCandidate {
            source: id,
            track_id: hit.id,
            raw_payload: payload.content,
            decoded: Some(decoded),
            duration_ms: hit.duration_ms,
            title_raw: hit.title,
            artist_raw: hit.artist,
            album_raw: hit.album,
            is_instrumental,
        });
    }
    Ok(candidates)
}

/// Join performer names the way the matcher expects them.
pub(crate) fn join_artists<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeSource, hit};
    use super::*;
    use std::sync::atomic::Ordering;

    struct Dictionary(&'static [(&'static str, &'static str)]);

    #[async_trait]
    impl Translator for Dictionary {
        async fn translate(&self, text: &str, _target: &str) -> Result<String, LyricsError> {
            self.0
                .iter()
                .find(|(from, _)| *from == text)
                .map(|(_, to)| to.to_string())
                .ok_or_else(|| LyricsError::Api("unknown".into()))
        }
    }

    async fn collect(source: &FakeSource, q: &LyricsQuery) -> Result<Vec<UpstreamCandidate>, LyricsError> {
        collect_candidates(source, q, &search_variants(q, None), 3).await
    }

    #[test]
    fn simplified_artist_adds_a_variant() {
        let q = LyricsQuery::new("Exile", "Taylor Swift feat. Bon Iver");
        let variants = search_variants(&q, None);
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[1].artist, "Taylor Swift");
        assert_eq!(search_variants(&LyricsQuery::new("Exile", "Taylor Swift"), None).len(), 1);
    }

    #[test]
    fn japanese_variant_is_searched_first() {
        let q = LyricsQuery::new("Yoru ni Kakeru", "YOASOBI");
        let ja = LyricsQuery::new("夜に駆ける", "YOASOBI");
        let variants = search_variants(&q, Some(ja));
        assert_eq!(variants[0].title, "夜に駆ける");
        assert_eq!(variants[1].title, "Yoru ni Kakeru");
    }

    #[test]
    fn title_only_needs_both_fields() {
        let q = LyricsQuery::new("Anti-Hero", "Taylor Swift");
        assert_eq!(title_only_variant(&q).unwrap().artist, "");
        assert!(title_only_variant(&LyricsQuery::new("Anti-Hero", "")).is_none());
    }

    #[tokio::test]
    async fn romaji_query_gets_a_japanese_variant() {
        let dict = Dictionary(&[("Yoru ni Kakeru", "夜に駆ける"), ("YOASOBI", "YOASOBI")]);
        let q = LyricsQuery::new("Yoru ni Kakeru", "YOASOBI");
        let ja = romaji_variant(&dict, &q).await.unwrap();
        assert_eq!(ja.title, "夜に駆ける");
        assert_eq!(ja.artist, "YOASOBI");

        let unchanged = Dictionary(&[("Hello", "Hello"), ("Adele", "Adele")]);
        assert!(romaji_variant(&unchanged, &LyricsQuery::new("Hello", "Adele")).await.is_none());
        assert!(romaji_variant(&dict, &LyricsQuery::new("夜に駆ける", "YOASOBI")).await.is_none());
        assert!(romaji_variant(&dict, &LyricsQuery::new("Unknown", "YOASOBI")).await.is_none());
    }

    #[test]
    fn select_hits_dedupes_and_ranks() {
        let q = LyricsQuery::new("Anti-Hero", "Taylor Swift").with_duration(200.5);
        let a = vec![
            hit(SourceId::Qq, "1", "Something Else", "Nobody", None),
            hit(SourceId::Qq, "2", "Anti-Hero", "Taylor Swift", Some(200_000)),
        ];
        let b = vec![hit(SourceId::Qq, "2", "Anti-Hero", "Taylor Swift", Some(200_000))];
        let picked = select_hits(std::slice::from_ref(&q), vec![a, b], 1);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "2");
    }

    #[tokio::test]
    async fn decode_failures_drop_only_that_hit() {
        let source = FakeSource::new(SourceId::Kugou)
            .with_hit(hit(SourceId::Kugou, "ok", "Song", "Artist", None))
            .with_hit(hit(SourceId::Kugou, "corrupt", "Song", "Artist", None));
        let q = LyricsQuery::new("Song", "Artist");
        let candidates = collect(&source, &q).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].track_id, "ok");
        assert!(candidates[0].has_lyrics());
    }

    #[tokio::test]
    async fn plain_lrc_payload_skips_platform_decoder() {
        let source = FakeSource::new(SourceId::Qq)
            .with_hit(hit(SourceId::Qq, "[00:01.00]plain line", "Song", "Artist", None));
        let q = LyricsQuery::new("Song", "Artist");
        let candidates = collect(&source, &q).await.unwrap();
        let lines = &candidates[0].decoded.as_ref().unwrap().lines;
        assert_eq!(lines[0].text, "plain line");
    }

    #[tokio::test]
    async fn search_failure_fails_the_source() {
        let mut source = FakeSource::new(SourceId::Netease);
        source.fail_search = true;
        let q = LyricsQuery::new("Song", "Artist");
        assert!(collect(&source, &q).await.is_err());
    }

    #[tokio::test]
    async fn non_transient_fetch_errors_are_not_retried() {
        let source = FakeSource::new(SourceId::Lrclib)
            .with_hit(hit(SourceId::Lrclib, "ok", "Song", "Artist", None));
        source.transient_failures.store(1, std::sync::atomic::Ordering::SeqCst);
        let q = LyricsQuery::new("Song", "Artist");
        let candidates = collect(&source, &q).await.unwrap();
        assert!(candidates.is_empty());
        assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_fetch_errors_are_retried() {
        let mut source = FakeSource::new(SourceId::Lrclib)
            .with_hit(hit(SourceId::Lrclib, "ok", "Song", "Artist", None));
        source.transient = true;
        source.transient_failures.store(1, Ordering::SeqCst);
        let q = LyricsQuery::new("Song", "Artist");
        let candidates = collect(&source, &q).await.unwrap();
        assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].has_lyrics());
    }

    #[tokio::test]
    async fn empty_payload_becomes_instrumental_candidate() {
        let source = FakeSource::new(SourceId::Lrclib)
            .with_hit(hit(SourceId::Lrclib, "empty", "Interlude", "Artist", Some(90_000)));
        let q = LyricsQuery::new("Interlude", "Artist");
        let candidates = collect(&source, &q).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_instrumental);
        assert_eq!(candidates[0].decoded, Some(DecodedLyrics::default()));
        assert!(!candidates[0].has_lyrics());
    }

    #[tokio::test]
    async fn title_only_search_runs_when_nothing_matched() {
        let mut source = FakeSource::new(SourceId::Qq).with_hit(hit(SourceId::Qq, "ok", "Song", "Someone", None));
        source.artist_filter = Some(String::new());
        let q = LyricsQuery::new("Song", "Artist");
        let candidates = collect(&source, &q).await.unwrap();
        assert_eq!(candidates.len(), 1);
        let searched: Vec<String> = source.searches.lock().unwrap().iter().map(|q| q.artist.clone()).collect();
        assert_eq!(searched, vec!["Artist".to_string(), String::new()]);
    }

    #[tokio::test]
    async fn title_only_search_is_skipped_when_hits_exist() {
        let source = FakeSource::new(SourceId::Qq).with_hit(hit(SourceId::Qq, "ok", "Song", "Artist", None));
        let q = LyricsQuery::new("Song", "Artist");
        collect(&source, &q).await.unwrap();
        assert_eq!(source.searches.lock().unwrap().len(), 1);
    }
}
