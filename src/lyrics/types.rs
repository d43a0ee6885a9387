use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::lyrics::codec::DecodeError;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) LyricsFlow/1.0";

// Shared HTTP client for sources that do not route through a proxy.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    build_http_client(None).expect("failed to build HTTP client")
});

/// Upstream platforms the gateway knows how to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Qq,
    Kugou,
    Netease,
    Musixmatch,
    Lrclib,
}

impl SourceId {
    pub const ALL: [SourceId; 5] = [
        SourceId::Qq,
        SourceId::Kugou,
        SourceId::Netease,
        SourceId::Musixmatch,
        SourceId::Lrclib,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Qq => "qq",
            SourceId::Kugou => "kugou",
            SourceId::Netease => "netease",
            SourceId::Musixmatch => "musixmatch",
            SourceId::Lrclib => "lrclib",
        }
    }

    /// Default timeout class for the platform.
    pub fn timeout_class(&self) -> TimeoutClass {
        match self {
            SourceId::Qq | SourceId::Kugou | SourceId::Netease => TimeoutClass::Domestic,
            SourceId::Musixmatch | SourceId::Lrclib => TimeoutClass::Overseas,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "qq" | "qqmusic" | "qq music" | "tencent" => Ok(SourceId::Qq),
            "kugou" => Ok(SourceId::Kugou),
            "netease" | "163" => Ok(SourceId::Netease),
            "musixmatch" | "mxm" => Ok(SourceId::Musixmatch),
            "lrclib" => Ok(SourceId::Lrclib),
            other => Err(format!("unknown lyrics source: {other}")),
        }
    }
}

/// Timeout budget an adapter declares to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// In-region platforms that normally answer quickly.
    Domestic,
    /// Platforms reached across regions.
    Overseas,
}

impl TimeoutClass {
    pub fn duration(&self) -> Duration {
        match self {
            TimeoutClass::Domestic => Duration::from_secs(15),
            TimeoutClass::Overseas => Duration::from_secs(25),
        }
    }
}

/// Track metadata supplied by the caller. Created per request and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LyricsQuery {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    /// Track length in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
}

impl LyricsQuery {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: None,
            duration: None,
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        let album = album.into();
        self.album = if album.trim().is_empty() { None } else { Some(album) };
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = (seconds.is_finite() && seconds > 0.0).then_some(seconds);
        self
    }

    pub fn album(&self) -> &str {
        self.album.as_deref().unwrap_or("")
    }

    /// Free-text search keyword: `artist - title`, or just the title when
    /// the artist is unknown.
    pub fn keyword(&self) -> String {
        let artist = self.artist.trim();
        if artist.is_empty() {
            self.title.trim().to_string()
        } else {
            format!("{artist} - {}", self.title.trim())
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration.map(|d| (d * 1000.0).round() as u64)
    }
}

/// One search result on a platform, before its lyrics are downloaded.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackHit {
    pub source: SourceId,
    /// Platform track identifier used by `fetch_lyrics`.
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: Option<u64>,
    /// Platform-declared instrumental flag, when the platform has one.
    pub instrumental: bool,
}

/// Raw bytes returned by a platform's lyric endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPayload {
    pub content: Vec<u8>,
    /// Separately delivered translation payload, still in the platform's encoding.
    pub translation: Option<Vec<u8>>,
}

impl RawPayload {
    pub fn new(content: Vec<u8>) -> Self {
        Self { content, translation: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWord {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// A decoded line before normalization. Timing is whatever the platform gave us.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawLine {
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    pub text: String,
    pub words: Vec<RawWord>,
    pub translation: Option<String>,
}

impl RawLine {
    pub fn new(start_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Structured lines recovered from a platform payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedLyrics {
    pub lines: Vec<RawLine>,
}

impl DecodedLyrics {
    pub fn is_syllable(&self) -> bool {
        self.lines.iter().any(|l| !l.words.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.text.trim().is_empty())
    }
}

/// A lyric document proposed by one source for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamCandidate {
    pub source: SourceId,
    pub track_id: String,
    pub raw_payload: Vec<u8>,
    /// `None` when the payload could not be decoded.
    pub decoded: Option<DecodedLyrics>,
    pub duration_ms: Option<u64>,
    pub title_raw: String,
    pub artist_raw: String,
    pub album_raw: String,
    pub is_instrumental: bool,
}

impl UpstreamCandidate {
    /// True when the candidate carries sung lyrics.
    pub fn has_lyrics(&self) -> bool {
        !self.is_instrumental && self.decoded.as_ref().is_some_and(|d| !d.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyllableLine {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub romaji: Option<String>,
    #[serde(default)]
    pub explicit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Syllable,
    Line,
}

/// Roles that can be lifted out of a lyric body into `credits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditRole {
    Lyricist,
    Composer,
    Arranger,
    Producer,
}

/// Normalized lyrics as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricsDocument {
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub source: SourceId,
    pub match_score: u8,
    pub lines: Vec<SyllableLine>,
    #[serde(default)]
    pub credits: BTreeMap<CreditRole, String>,
}

/// LyricsFlow Standard JSON word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseWord {
    pub txt: String,
    pub st: f64,
    pub et: f64,
}

/// LyricsFlow Standard JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseLine {
    pub st: f64,
    pub et: f64,
    pub txt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<ResponseWord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trans: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub romaji: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub explicit: bool,
}

/// LyricsFlow Standard JSON document returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricsResponse {
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub source: String,
    pub match_score: u8,
    pub lines: Vec<ResponseLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<BTreeMap<CreditRole, String>>,
}

fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

impl From<&LyricsDocument> for LyricsResponse {
    fn from(doc: &LyricsDocument) -> Self {
        let lines = doc
            .lines
            .iter()
            .map(|line| ResponseLine {
                st: ms_to_secs(line.start_ms),
                et: ms_to_secs(line.end_ms),
                txt: line.text.clone(),
                words: (!line.words.is_empty()).then(|| {
                    line.words
                        .iter()
                        .map(|w| ResponseWord {
                            txt: w.text.clone(),
                            st: ms_to_secs(w.start_ms),
                            et: ms_to_secs(w.end_ms),
                        })
                        .collect()
                }),
                trans: line.translation.clone(),
                romaji: line.romaji.clone(),
                explicit: line.explicit,
            })
            .collect();
        Self {
            doc_type: doc.doc_type,
            source: doc.source.to_string(),
            match_score: doc.match_score,
            lines,
            credits: (!doc.credits.is_empty()).then(|| doc.credits.clone()),
        }
    }
}

#[derive(Error, Debug)]
pub enum LyricsError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("API error: {0}")]
    Api(String),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Translation error: {0}")]
    Translate(String),
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),
}

impl LyricsError {
    /// Map a non-success HTTP status. Rate limiting and server errors are
    /// worth retrying; anything else is a plain API error.
    pub fn from_status(context: &str, status: StatusCode) -> Self {
        let message = format!("{context}: HTTP {status}");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            LyricsError::Unavailable(message)
        } else {
            LyricsError::Api(message)
        }
    }

    /// Whether retrying the same request might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LyricsError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LyricsError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// Build an HTTP client, optionally routed through `proxy`.
pub fn build_http_client(proxy: Option<&str>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .pool_max_idle_per_host(20)
        .timeout(Duration::from_secs(20));
    if let Some(url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(url)?);
    }
    builder.build()
}

// Shared client for providers within the lyrics module
pub(crate) fn http_client() -> &'static Client {
    &HTTP_CLIENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_parses_aliases() {
        assert_eq!("QQ Music".parse::<SourceId>(), Ok(SourceId::Qq));
        assert_eq!("netease".parse::<SourceId>(), Ok(SourceId::Netease));
        assert!("spotify".parse::<SourceId>().is_err());
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(LyricsError::from_status("qq search", StatusCode::BAD_GATEWAY).is_transient());
        assert!(LyricsError::from_status("qq search", StatusCode::TOO_MANY_REQUESTS).is_transient());
        let not_found = LyricsError::from_status("lrclib", StatusCode::NOT_FOUND);
        assert!(!not_found.is_transient());
        assert_eq!(not_found.to_string(), "API error: lrclib: HTTP 404 Not Found");
    }

    #[test]
    fn query_duration_in_ms() {
        let q = LyricsQuery::new("Anti-Hero", "Taylor Swift").with_duration(200.5);
        assert_eq!(q.duration_ms(), Some(200_500));
        assert_eq!(LyricsQuery::new("a", "b").with_duration(-1.0).duration_ms(), None);
    }

    #[test]
    fn response_uses_seconds_and_omits_empty_parts() {
        let doc = LyricsDocument {
            doc_type: DocumentType::Line,
            source: SourceId::Lrclib,
            match_score: 88,
            lines: vec![SyllableLine {
                start_ms: 1500,
                end_ms: 3250,
                text: "hello".into(),
                words: vec![],
                translation: None,
                romaji: None,
                explicit: false,
            }],
            credits: BTreeMap::new(),
        };
        let json = serde_json::to_value(LyricsResponse::from(&doc)).unwrap();
        assert_eq!(json["type"], "line");
        assert_eq!(json["source"], "lrclib");
        assert_eq!(json["lines"][0]["st"], 1.5);
        assert_eq!(json["lines"][0]["et"], 3.25);
        assert!(json["lines"][0].get("words").is_none());
        assert!(json.get("credits").is_none());
    }
}
