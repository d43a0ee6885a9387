use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::time::Duration;

use super::{LyricSource, SourceContext, join_artists};
use crate::lyrics::codec::{DecodeError, qrc};
use crate::lyrics::parse::parse_qrc;
use crate::lyrics::types::{DecodedLyrics, LyricsError, LyricsQuery, RawPayload, SourceId, TrackHit};

const SEARCH_URL: &str = "https://u.y.qq.com/cgi-bin/musicu.fcg";
const LYRIC_URL: &str = "https://c.y.qq.com/qqmusic/fcgi-bin/lyric_download.fcg";
const CLIENT_UA: &str = "QQMusic/197449790";

static CONTENT_CDATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<content(?:\s[^>]*)?>\s*<!\[CDATA\[(.*?)\]\]>").unwrap());
static CONTENT_PLAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<content(?:\s[^>]*)?>(.*?)</content>").unwrap());
static LYRIC_CDATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<lyric(?:\s[^>]*)?>\s*<!\[CDATA\[(.*?)\]\]>").unwrap());
static TRANS_CDATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<contentts(?:\s[^>]*)?>\s*<!\[CDATA\[(.*?)\]\]>").unwrap());
static TRANS_PLAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<contentts(?:\s[^>]*)?>(.*?)</contentts>").unwrap());

/// QQ Music: desktop search plus the client lyric download, which returns
/// hex-encoded QRC.
pub struct QqMusic {
    ctx: SourceContext,
}

impl QqMusic {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }
}

fn search_body(query: &LyricsQuery) -> Value {
    json!({
        "req_1": {
            "method": "DoSearchForQQMusicDesktop",
            "module": "music.search.SearchCgiService",
            "param": {
                "num_per_page": 20,
                "page_num": 1,
                "query": query.keyword(),
                "search_type": 0
            }
        }
    })
}

fn parse_search(json: &Value) -> Vec<TrackHit> {
    let Some(list) = json.pointer("/req_1/data/body/song/list").and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|song| {
            let id = song.get("id").and_then(Value::as_u64).filter(|id| *id > 0)?;
            let title = song.get("name").and_then(Value::as_str).filter(|t| !t.is_empty())?;
            let artist = song
                .get("singer")
                .and_then(Value::as_array)
                .map(|singers| join_artists(singers.iter().filter_map(|s| s.get("name").and_then(Value::as_str))))
                .unwrap_or_default();
            Some(TrackHit {
                source: SourceId::Qq,
                id: id.to_string(),
                title: title.to_string(),
                artist,
                album: song.pointer("/album/name").and_then(Value::as_str).unwrap_or("").to_string(),
                duration_ms: song.get("interval").and_then(Value::as_u64).filter(|s| *s > 0).map(|s| s * 1000),
                instrumental: false,
            })
        })
        .collect()
}

fn capture_trimmed(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty() && !s.starts_with("<![CDATA["))
}

/// Pull the hex QRC body and optional translation out of a
/// `lyric_download.fcg` response. The XML comes wrapped in `<!-- -->`.
fn extract_payload(response: &str) -> Option<RawPayload> {
    let text = response.replace("<!--", "").replace("-->", "");
    let content = capture_trimmed(&CONTENT_CDATA_RE, &text)
        .or_else(|| capture_trimmed(&CONTENT_PLAIN_RE, &text))
        .or_else(|| capture_trimmed(&LYRIC_CDATA_RE, &text))?;
    let translation = capture_trimmed(&TRANS_CDATA_RE, &text).or_else(|| capture_trimmed(&TRANS_PLAIN_RE, &text));
    Some(RawPayload {
        content: content.into_bytes(),
        translation: translation.map(String::into_bytes),
    })
}

#[async_trait]
impl LyricSource for QqMusic {
    fn id(&self) -> SourceId {
        SourceId::Qq
    }

    fn timeout(&self) -> Duration {
        self.ctx.timeout
    }

    async fn search(&self, query: &LyricsQuery) -> Result<Vec<TrackHit>, LyricsError> {
        let resp = self
            .ctx
            .client
            .post(SEARCH_URL)
            .header("Referer", "https://c.y.qq.com/")
            .json(&search_body(query))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(LyricsError::from_status("qq search", resp.status()));
        }
        let json: Value = resp.json().await?;
        Ok(parse_search(&json))
    }

    async fn fetch_lyrics(&self, hit: &TrackHit) -> Result<RawPayload, LyricsError> {
        let form = [
            ("version", "15"),
            ("miniversion", "82"),
            ("lrctype", "4"),
            ("musicid", hit.id.as_str()),
        ];
        let resp = self
            .ctx
            .client
            .post(LYRIC_URL)
            .header("User-Agent", CLIENT_UA)
            .header("Referer", "https://y.qq.com/")
            .form(&form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(LyricsError::from_status("qq lyric download", resp.status()));
        }
        let body = resp.text().await?;
        match extract_payload(&body) {
            Some(payload) => Ok(payload),
            None => {
                tracing::debug!(track = %hit.id, "No QRC content in QQ response");
                Ok(RawPayload::default())
            }
        }
    }

    fn decode(&self, hit: &TrackHit, payload: &RawPayload) -> Result<DecodedLyrics, DecodeError> {
        let hex_text = std::str::from_utf8(&payload.content)
            .map_err(|e| DecodeError::Format(format!("QRC hex is not text: {e}")))?;
        let xml = qrc::decode_hex(hex_text)?;

        // A broken translation only costs the translation.
        let translation = payload.translation.as_deref().and_then(|raw| {
            let decoded = std::str::from_utf8(raw)
                .map_err(|e| DecodeError::Format(e.to_string()))
                .and_then(qrc::decode_hex);
            match decoded {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::debug!(track = %hit.id, error = %e, "Dropping undecodable QQ translation");
                    None
                }
            }
        });
        Ok(parse_qrc(&xml, translation.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // "[0,1000]Hel(0,500)lo(500,500)\n" encrypted as QRC.
    const QRC_HEX: &str = "BB1DB48DC814CA52CA0EB52C6A6EE486FA1333625082152699796A96B51B1574C17426906DB6125F";

    fn source() -> QqMusic {
        QqMusic::new(SourceContext {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(15),
        })
    }

    #[test]
    fn search_query_is_artist_dash_title() {
        let body = search_body(&LyricsQuery::new("晴天", "周杰伦"));
        assert_eq!(body.pointer("/req_1/param/query").unwrap(), "周杰伦 - 晴天");
    }

    #[test]
    fn search_results_map_to_hits() {
        let json = json!({"req_1": {"data": {"body": {"song": {"list": [
            {"id": 97773, "mid": "0039MnYb0qxYhV", "name": "晴天", "interval": 269,
             "album": {"name": "叶惠美"}, "singer": [{"name": "周杰伦"}]},
            {"id": 0, "name": "broken"}
        ]}}}}});
        let hits = parse_search(&json);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "97773");
        assert_eq!(hits[0].artist, "周杰伦");
        assert_eq!(hits[0].album, "叶惠美");
        assert_eq!(hits[0].duration_ms, Some(269_000));
    }

    #[test]
    fn download_response_yields_hex_bodies() {
        let response = "<!--<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<QrcInfos><lyric><content><![CDATA[ABCD]]></content>\
            <contentts><![CDATA[EF01]]></contentts></lyric></QrcInfos>-->";
        let payload = extract_payload(response).unwrap();
        assert_eq!(payload.content, b"ABCD");
        assert_eq!(payload.translation.as_deref(), Some(&b"EF01"[..]));
    }

    #[test]
    fn translation_tag_is_not_mistaken_for_content() {
        let response = "<contentts><![CDATA[EF01]]></contentts><content>ABCD</content>";
        let payload = extract_payload(response).unwrap();
        assert_eq!(payload.content, b"ABCD");
        assert!(extract_payload("<QrcInfos></QrcInfos>").is_none());
    }

    #[test]
    fn decode_survives_a_bad_translation() {
        let hit = parse_search(&json!({"req_1": {"data": {"body": {"song": {"list": [
            {"id": 1, "name": "Hello"}
        ]}}}}}))
        .remove(0);
        let payload = RawPayload {
            content: QRC_HEX.as_bytes().to_vec(),
            translation: Some(b"zz".to_vec()),
        };
        let decoded = source().decode(&hit, &payload).unwrap();
        assert_eq!(decoded.lines.len(), 1);
        assert_eq!(decoded.lines[0].text, "Hello");
        assert_eq!(decoded.lines[0].words.len(), 2);
        assert!(decoded.lines[0].translation.is_none());
    }
}
