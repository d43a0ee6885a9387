use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{LyricSource, SourceContext};
use crate::lyrics::codec::DecodeError;
use crate::lyrics::parse::parse_lrc;
use crate::lyrics::types::{DecodedLyrics, LyricsError, LyricsQuery, RawPayload, SourceId, TrackHit};

const BASE_URL: &str = "https://lrclib.net/api";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrcLibTrack {
    id: u64,
    #[serde(default)]
    track_name: String,
    #[serde(default)]
    artist_name: String,
    #[serde(default)]
    album_name: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    instrumental: bool,
    #[serde(default)]
    synced_lyrics: Option<String>,
}

/// Community-sourced line-synced lyrics from lrclib.net.
pub struct Lrclib {
    ctx: SourceContext,
}

impl Lrclib {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }
}

/// Build the lrclib search URL. Album is included when available.
fn build_search_url(query: &LyricsQuery) -> String {
    let mut params = vec![format!("track_name={}", urlencoding::encode(&query.title))];
    if !query.artist.trim().is_empty() {
        params.push(format!("artist_name={}", urlencoding::encode(&query.artist)));
    }

    if let Some(album) = query.album.as_deref() {
        params.push(format!("album_name={}", urlencoding::encode(album)));
    }

    format!("{BASE_URL}/search?{}", params.join("&"))
}

fn to_hit(track: LrcLibTrack) -> TrackHit {
    TrackHit {
        source: SourceId::Lrclib,
        id: track.id.to_string(),
        title: track.track_name,
        artist: track.artist_name,
        album: track.album_name.unwrap_or_default(),
        duration_ms: track.duration.filter(|d| *d > 0.0).map(|d| (d * 1000.0).round() as u64),
        instrumental: track.instrumental,
    }
}

#[async_trait]
impl LyricSource for Lrclib {
    fn id(&self) -> SourceId {
        SourceId::Lrclib
    }

    fn timeout(&self) -> Duration {
        self.ctx.timeout
    }

    async fn search(&self, query: &LyricsQuery) -> Result<Vec<TrackHit>, LyricsError> {
        let resp = self.ctx.client.get(build_search_url(query)).send().await?;
        if !resp.status().is_success() {
            return Err(LyricsError::from_status("lrclib", resp.status()));
        }
        let tracks: Vec<LrcLibTrack> = resp.json().await?;
        Ok(tracks.into_iter().map(to_hit).collect())
    }

    async fn fetch_lyrics(&self, hit: &TrackHit) -> Result<RawPayload, LyricsError> {
        let url = format!("{BASE_URL}/get/{}", urlencoding::encode(&hit.id));
        let resp = self.ctx.client.get(&url).send().await?;

        // 404 means no lyrics for this id
        if resp.status().as_u16() == 404 {
            return Ok(RawPayload::default());
        }
        if !resp.status().is_success() {
            return Err(LyricsError::from_status("lrclib", resp.status()));
        }

        let track: LrcLibTrack = resp.json().await?;
        Ok(RawPayload::new(track.synced_lyrics.unwrap_or_default().into_bytes()))
    }

    fn decode(&self, _hit: &TrackHit, payload: &RawPayload) -> Result<DecodedLyrics, DecodeError> {
        let text = String::from_utf8(payload.content.clone())?;
        Ok(DecodedLyrics { lines: parse_lrc(&text) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_includes_album_only_when_known() {
        let q = LyricsQuery::new("Anti-Hero", "Taylor Swift");
        assert_eq!(
            build_search_url(&q),
            "https://lrclib.net/api/search?track_name=Anti-Hero&artist_name=Taylor%20Swift"
        );
        let q = q.with_album("Midnights");
        assert!(build_search_url(&q).ends_with("&album_name=Midnights"));

        let title_only = LyricsQuery::new("Anti-Hero", "");
        assert_eq!(build_search_url(&title_only), "https://lrclib.net/api/search?track_name=Anti-Hero");
    }

    #[test]
    fn search_results_map_to_hits() {
        let body = r#"[{"id":3396226,"trackName":"Anti-Hero","artistName":"Taylor Swift",
            "albumName":"Midnights","duration":200.0,"instrumental":false,
            "plainLyrics":"...","syncedLyrics":"[00:01.00] hi"}]"#;
        let tracks: Vec<LrcLibTrack> = serde_json::from_str(body).unwrap();
        let hit = to_hit(tracks.into_iter().next().unwrap());
        assert_eq!(hit.id, "3396226");
        assert_eq!(hit.album, "Midnights");
        assert_eq!(hit.duration_ms, Some(200_000));
        assert!(!hit.instrumental);
    }
}
