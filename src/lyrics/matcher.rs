//! Candidate scoring and selection.
//!
//! The engine is stateless per request. Selection depends only on the set of
//! candidates, never on the order they arrived in.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::config::{MatchConfig, TranslateConfig};
use crate::lyrics::enrich::Translator;
use crate::lyrics::similarity::{album_similarity, artist_similarity, title_similarity};
use crate::lyrics::types::{LyricsQuery, UpstreamCandidate};

/// Per-field similarity (0..=100) and the combined score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInfo {
    pub title: f64,
    pub artist: f64,
    /// `None` when either side has no album.
    pub album: Option<f64>,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotFound {
    NoCandidates,
    BelowThreshold { best: u8, min_score: u8 },
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::NoCandidates => f.write_str("no source returned a candidate"),
            NotFound::BelowThreshold { best, min_score } => {
                write!(f, "best candidate scored {best}, below the minimum of {min_score}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub candidate: UpstreamCandidate,
    pub score: u8,
    /// Title that produced the winning score when it was not the query's own.
    pub matched_title: Option<String>,
}

#[derive(Debug, Clone)]
struct Ranked {
    index: usize,
    score: u8,
    /// Set when an alternate or translated title produced `score`.
    matched_title: Option<String>,
    duration_delta: Option<u64>,
    has_lyrics: bool,
}

pub struct MatchEngine {
    config: MatchConfig,
    translate: TranslateConfig,
    translator: Option<Arc<dyn Translator>>,
}

impl MatchEngine {
    pub fn new(config: MatchConfig) -> Self {
        Self {
            config,
            translate: TranslateConfig::default(),
            translator: None,
        }
    }

    pub fn with_translator(mut self, translate: TranslateConfig, translator: Arc<dyn Translator>) -> Self {
        self.translate = translate;
        self.translator = Some(translator);
        self
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Weighted similarity of a candidate against `title` and the query's
    /// artist and album. Without an album on both sides the album weight is
    /// spread over title and artist.
    pub fn score(&self, query: &LyricsQuery, title: &str, candidate: &UpstreamCandidate) -> ScoreInfo {
        let t = title_similarity(title, &candidate.title_raw);
        let a = artist_similarity(&query.artist, &candidate.artist_raw);
        let album = (!query.album().trim().is_empty() && !candidate.album_raw.trim().is_empty())
            .then(|| album_similarity(query.album(), &candidate.album_raw));

        let c = &self.config;
        let (mut weighted, mut total) = (t * c.title_weight + a * c.artist_weight, c.title_weight + c.artist_weight);
        if let Some(al) = album {
            weighted += al * c.album_weight;
            total += c.album_weight;
        }
        let combined = if total > 0.0 { weighted / total } else { 0.0 };
        ScoreInfo {
            title: t,
            artist: a,
            album,
            score: combined.round().clamp(0.0, 100.0) as u8,
        }
    }

    fn duration_delta(query: &LyricsQuery, candidate: &UpstreamCandidate) -> Option<u64> {
        Some(query.duration_ms()?.abs_diff(candidate.duration_ms?))
    }

    /// Indices of candidates that survive the duration filter. When no
    /// candidate is within tolerance the filter is skipped entirely.
    pub fn duration_filter(&self, query: &LyricsQuery, candidates: &[UpstreamCandidate]) -> Vec<usize> {
        let all: Vec<usize> = (0..candidates.len()).collect();
        if query.duration_ms().is_none() {
            return all;
        }
        let within: Vec<usize> = all
            .iter()
            .copied()
            .filter(|&i| {
                Self::duration_delta(query, &candidates[i]).is_some_and(|d| d <= self.config.duration_tolerance_ms)
            })
            .collect();
        if within.is_empty() {
            tracing::debug!("No candidate within duration tolerance, keeping all");
            all
        } else {
            within
        }
    }

    // Lyric-bearing first, then score, priority, duration delta, source, track id.
    fn compare(&self, candidates: &[UpstreamCandidate], a: &Ranked, b: &Ranked) -> Ordering {
        let (ca, cb) = (&candidates[a.index], &candidates[b.index]);
        b.has_lyrics
            .cmp(&a.has_lyrics)
            .then(b.score.cmp(&a.score))
            .then(self.config.priority_rank(ca.source).cmp(&self.config.priority_rank(cb.source)))
            .then(match (a.duration_delta, b.duration_delta) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then(ca.source.cmp(&cb.source))
            .then(ca.track_id.cmp(&cb.track_id))
    }

    async fn translated_title(&self, title: &str) -> Option<String> {
        let translator = self.translator.as_ref()?;
        if !self.translate.enabled || !title.is_ascii() {
            return None;
        }
        match translator.translate(title, &self.translate.target).await {
            Ok(t) if !t.trim().is_empty() && t.trim() != title.trim() => Some(t),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(title, error = %e, "Title translation failed");
                None
            }
        }
    }

    /// Pick the winning candidate, or say why there is none.
    pub async fn select(&self, query: &LyricsQuery, candidates: Vec<UpstreamCandidate>) -> Result<Selection, NotFound> {
        self.select_with(query, &[], candidates).await
    }

    /// Like [`select`](Self::select), but each candidate also scores against
    /// `alternates` (e.g. a Japanese rendering of a romanized query) and
    /// keeps its best result.
    pub async fn select_with(
        &self,
        query: &LyricsQuery,
        alternates: &[LyricsQuery],
        mut candidates: Vec<UpstreamCandidate>,
    ) -> Result<Selection, NotFound> {
        if candidates.is_empty() {
            return Err(NotFound::NoCandidates);
        }

        let mut ranked: Vec<Ranked> = self
            .duration_filter(query, &candidates)
            .into_iter()
            .map(|index| {
                let c = &candidates[index];
                Ranked {
                    index,
                    score: self.score(query, &query.title, c).score,
                    matched_title: None,
                    duration_delta: Self::duration_delta(query, c),
                    has_lyrics: c.has_lyrics(),
                }
            })
            .collect();

        for alt in alternates {
            for r in &mut ranked {
                let s = self.score(alt, &alt.title, &candidates[r.index]).score;
                if s > r.score {
                    r.score = s;
                    r.matched_title = Some(alt.title.clone());
                }
            }
        }

        let min = self.config.min_score;
        if ranked.iter().all(|r| r.score < min)
            && let Some(title) = self.translated_title(&query.title).await
        {
            tracing::debug!(original = %query.title, translated = %title, "Rescoring with translated title");
            for r in &mut ranked {
                let s = self.score(query, &title, &candidates[r.index]).score;
                if s > r.score {
                    r.score = s;
                    r.matched_title = Some(title.clone());
                }
            }
        }

        let best_any = ranked.iter().map(|r| r.score).max().unwrap_or(0);
        ranked.retain(|r| r.score >= min);
        ranked.sort_by(|a, b| self.compare(&candidates, a, b));

        let Some(winner) = ranked.into_iter().next() else {
            tracing::info!(best = best_any, min_score = min, "No candidate cleared the threshold");
            return Err(NotFound::BelowThreshold { best: best_any, min_score: min });
        };

        let candidate = candidates.swap_remove(winner.index);
        tracing::info!(
            source = %candidate.source,
            track = %candidate.track_id,
            score = winner.score,
            instrumental = !winner.has_lyrics,
            matched_title = winner.matched_title.as_deref(),
            "Selected candidate"
        );
        Ok(Selection {
            candidate,
            score: winner.score,
            matched_title: winner.matched_title,
        })
    }
}
