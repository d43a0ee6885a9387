use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{LyricSource, SourceContext};
use crate::lyrics::codec::{DecodeError, krc};
use crate::lyrics::parse::parse_krc;
use crate::lyrics::types::{DecodedLyrics, LyricsError, LyricsQuery, RawPayload, SourceId, TrackHit};

const SEARCH_URL: &str = "http://mobilecdn.kugou.com/api/v3/search/song";
const LYRIC_SEARCH_URL: &str = "https://lyrics.kugou.com/search";
const LYRIC_DOWNLOAD_URL: &str = "http://lyrics.kugou.com/download";

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Deserialize)]
struct SearchData {
    #[serde(default)]
    info: Vec<SongInfo>,
}

#[derive(Deserialize)]
struct SongInfo {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    songname: String,
    #[serde(default)]
    singername: String,
    #[serde(default)]
    album_name: Option<String>,
    /// Seconds.
    #[serde(default)]
    duration: u64,
}

#[derive(Deserialize)]
struct LyricCandidates {
    #[serde(default)]
    candidates: Vec<LyricCandidate>,
}

#[derive(Deserialize)]
struct LyricCandidate {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    accesskey: String,
}

#[derive(Deserialize)]
struct Download {
    #[serde(default)]
    content: String,
}

/// Kugou: song search by keyword, then a lyric candidate lookup by file
/// hash and a KRC download.
pub struct Kugou {
    ctx: SourceContext,
}

impl Kugou {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }
}

fn to_hits(resp: SearchResponse) -> Vec<TrackHit> {
    resp.data
        .map(|d| d.info)
        .unwrap_or_default()
        .into_iter()
        .filter(|s| !s.hash.is_empty() && !s.songname.is_empty())
        .map(|s| TrackHit {
            source: SourceId::Kugou,
            id: s.hash,
            title: s.songname,
            artist: s.singername,
            album: s.album_name.unwrap_or_default(),
            duration_ms: (s.duration > 0).then_some(s.duration * 1000),
            instrumental: false,
        })
        .collect()
}

// Candidate ids arrive as either numbers or strings.
fn candidate_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl LyricSource for Kugou {
    fn id(&self) -> SourceId {
        SourceId::Kugou
    }

    fn timeout(&self) -> Duration {
        self.ctx.timeout
    }

    async fn search(&self, query: &LyricsQuery) -> Result<Vec<TrackHit>, LyricsError> {
        let keyword = query.keyword();
        let resp = self
            .ctx
            .client
            .get(SEARCH_URL)
            .query(&[
                ("format", "json"),
                ("keyword", keyword.as_str()),
                ("page", "1"),
                ("pagesize", "20"),
                ("showtype", "1"),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(LyricsError::from_status("kugou search", resp.status()));
        }
        // The endpoint answers with text/html content type; parse the body ourselves.
        let body = resp.text().await?;
        Ok(to_hits(serde_json::from_str(&body)?))
    }

    async fn fetch_lyrics(&self, hit: &TrackHit) -> Result<RawPayload, LyricsError> {
        let duration = hit.duration_ms.unwrap_or(0).to_string();
        let resp = self
            .ctx
            .client
            .get(LYRIC_SEARCH_URL)
            .query(&[
                ("ver", "1"),
                ("man", "yes"),
                ("client", "pc"),
                ("keyword", hit.title.as_str()),
                ("hash", hit.id.as_str()),
                ("duration", duration.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(LyricsError::from_status("kugou lyric search", resp.status()));
        }
        let found: LyricCandidates = serde_json::from_str(&resp.text().await?)?;
        let Some((id, accesskey)) = found
            .candidates
            .first()
            .and_then(|c| candidate_id(&c.id).map(|id| (id, c.accesskey.clone())))
            .filter(|(_, key)| !key.is_empty())
        else {
            tracing::debug!(hash = %hit.id, "No Kugou lyric candidates");
            return Ok(RawPayload::default());
        };

        let resp = self
            .ctx
            .client
            .get(LYRIC_DOWNLOAD_URL)
            .query(&[
                ("ver", "1"),
                ("client", "pc"),
                ("id", id.as_str()),
                ("accesskey", accesskey.as_str()),
                ("fmt", "krc"),
                ("charset", "utf8"),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(LyricsError::from_status("kugou lyric download", resp.status()));
        }
        let download: Download = serde_json::from_str(&resp.text().await?)?;
        Ok(RawPayload::new(download.content.into_bytes()))
    }

    /// The payload is the Base64 text from the download endpoint.
    fn decode(&self, _hit: &TrackHit, payload: &RawPayload) -> Result<DecodedLyrics, DecodeError> {
        let text = std::str::from_utf8(&payload.content)
            .map_err(|e| DecodeError::Format(format!("KRC payload is not text: {e}")))?;
        Ok(parse_krc(&krc::decode_base64_payload(text)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KRC_B64: &str = "a3JjMTjbGsglTQAO92N5R7+bQj70xu/W37M169y3v4RPU+Do3QAL+VO6caa00kIszq2yZOk=";

    fn source() -> Kugou {
        Kugou::new(SourceContext {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(15),
        })
    }

    #[test]
    fn search_results_map_to_hits() {
        let body = r#"{"status":1,"data":{"info":[
            {"hash":"A1B2","songname":"晴天","singername":"周杰伦","album_name":"叶惠美","duration":269},
            {"hash":"","songname":"no hash","singername":"x","duration":0}
        ]}}"#;
        let hits = to_hits(serde_json::from_str(body).unwrap());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "A1B2");
        assert_eq!(hits[0].duration_ms, Some(269_000));
    }

    #[test]
    fn candidate_ids_accept_numbers_and_strings() {
        assert_eq!(candidate_id(&serde_json::json!(12345)).as_deref(), Some("12345"));
        assert_eq!(candidate_id(&serde_json::json!("12345")).as_deref(), Some("12345"));
        assert_eq!(candidate_id(&serde_json::json!(null)), None);
    }

    #[test]
    fn decodes_base64_krc() {
        let hit = TrackHit {
            source: SourceId::Kugou,
            id: "A1B2".into(),
            title: "Hello".into(),
            artist: String::new(),
            album: String::new(),
            duration_ms: None,
            instrumental: false,
        };
        let decoded = source().decode(&hit, &RawPayload::new(KRC_B64.as_bytes().to_vec())).unwrap();
        assert_eq!(decoded.lines.len(), 1);
        assert_eq!(decoded.lines[0].text, "Hello");
        assert_eq!(decoded.lines[0].words[1].start_ms, 500);

        let broken = source().decode(&hit, &RawPayload::new(b"!!".to_vec()));
        assert!(matches!(broken, Err(DecodeError::Base64(_))));
    }
}
