use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

use super::{LyricSource, SourceContext, join_artists};
use crate::lyrics::codec::{DecodeError, eapi};
use crate::lyrics::parse::parse_netease;
use crate::lyrics::types::{DecodedLyrics, LyricsError, LyricsQuery, RawPayload, SourceId, TrackHit};

const SEARCH_URL: &str = "http://music.163.com/api/search/get/web";
const EAPI_HOST: &str = "https://interface3.music.163.com";
const LYRIC_PATH: &str = "/api/song/lyric/v1";

/// Netease Cloud Music: plain web search, lyrics through the encrypted
/// EAPI endpoint (LRC, YRC word timing and translations in one response).
pub struct Netease {
    ctx: SourceContext,
}

impl Netease {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }
}

fn parse_search(json: &Value) -> Result<Vec<TrackHit>, LyricsError> {
    let code = json.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 200 {
        return Err(LyricsError::Api(format!("netease search: code {code}")));
    }
    let Some(songs) = json.pointer("/result/songs").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    Ok(songs
        .iter()
        .filter_map(|song| {
            let id = song.get("id").and_then(Value::as_u64)?;
            let artist = song
                .get("artists")
                .and_then(Value::as_array)
                .map(|ars| join_artists(ars.iter().filter_map(|a| a.get("name").and_then(Value::as_str))))
                .unwrap_or_default();
            Some(TrackHit {
                source: SourceId::Netease,
                id: id.to_string(),
                title: song.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                artist,
                album: song.pointer("/album/name").and_then(Value::as_str).unwrap_or("").to_string(),
                duration_ms: song.get("duration").and_then(Value::as_u64).filter(|d| *d > 0),
                instrumental: false,
            })
        })
        .collect())
}

fn lyric_params(track_id: &str) -> String {
    let body = json!({
        "id": track_id,
        "os": "linux",
        "lv": -1,
        "kv": -1,
        "tv": -1,
        "rv": -1,
        "yv": 1,
        "ytv": 1,
        "yrv": 1,
    });
    eapi::encode_params(LYRIC_PATH, &body)
}

#[async_trait]
impl LyricSource for Netease {
    fn id(&self) -> SourceId {
        SourceId::Netease
    }

    fn timeout(&self) -> Duration {
        self.ctx.timeout
    }

    async fn search(&self, query: &LyricsQuery) -> Result<Vec<TrackHit>, LyricsError> {
        let keyword = format!("{} {}", query.title, query.artist).trim().to_string();
        let resp = self
            .ctx
            .client
            .get(SEARCH_URL)
            .header("Referer", "https://music.163.com/")
            .query(&[("s", keyword.as_str()), ("type", "1"), ("offset", "0"), ("limit", "20")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(LyricsError::from_status("netease search", resp.status()));
        }
        let json: Value = resp.json().await?;
        parse_search(&json)
    }

    async fn fetch_lyrics(&self, hit: &TrackHit) -> Result<RawPayload, LyricsError> {
        let resp = self
            .ctx
            .client
            .post(eapi::eapi_url(EAPI_HOST, LYRIC_PATH))
            .header("Referer", "https://music.163.com/")
            .header("Cookie", "os=pc; appver=2.10.13")
            .form(&[("params", lyric_params(&hit.id))])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(LyricsError::from_status("netease lyric", resp.status()));
        }
        Ok(RawPayload::new(resp.bytes().await?.to_vec()))
    }

    /// Responses are usually plain JSON; encrypted ones are decrypted first.
    fn decode(&self, _hit: &TrackHit, payload: &RawPayload) -> Result<DecodedLyrics, DecodeError> {
        let json = if payload.content.trim_ascii_start().starts_with(b"{") {
            serde_json::from_slice(&payload.content)?
        } else {
            eapi::decrypt_response(&payload.content)?
        };
        parse_netease(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Netease {
        Netease::new(SourceContext {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(15),
        })
    }

    fn hit() -> TrackHit {
        TrackHit {
            source: SourceId::Netease,
            id: "186016".into(),
            title: "晴天".into(),
            artist: "周杰伦".into(),
            album: String::new(),
            duration_ms: None,
            instrumental: false,
        }
    }

    #[test]
    fn search_results_map_to_hits() {
        let json = json!({"code": 200, "result": {"songs": [
            {"id": 186016, "name": "晴天", "artists": [{"name": "周杰伦"}, {"name": ""}],
             "album": {"name": "叶惠美"}, "duration": 269000}
        ]}});
        let hits = parse_search(&json).unwrap();
        assert_eq!(hits[0].id, "186016");
        assert_eq!(hits[0].artist, "周杰伦");
        assert_eq!(hits[0].duration_ms, Some(269_000));

        assert!(parse_search(&json!({"code": 200, "result": {}})).unwrap().is_empty());
        assert!(parse_search(&json!({"code": -460})).is_err());
    }

    #[test]
    fn lyric_params_round_trip_through_eapi() {
        let params = eapi::decode_params(&lyric_params("186016")).unwrap();
        assert_eq!(params.path, LYRIC_PATH);
        assert_eq!(params.body["id"], "186016");
        assert_eq!(params.body["yv"], 1);
    }

    #[test]
    fn decodes_plain_json_response() {
        let body = json!({
            "code": 200,
            "lrc": {"lyric": "[00:01.00]刮风这天\n[00:05.00]我试过握着你手\n"},
            "tlyric": {"lyric": "[00:01.00]The windy day\n"}
        });
        let payload = RawPayload::new(serde_json::to_vec(&body).unwrap());
        let decoded = source().decode(&hit(), &payload).unwrap();
        assert_eq!(decoded.lines.len(), 2);
        assert_eq!(decoded.lines[0].translation.as_deref(), Some("The windy day"));
    }

    #[test]
    fn garbage_response_is_a_decode_error() {
        let payload = RawPayload::new(vec![0x01, 0x02, 0x03]);
        assert!(source().decode(&hit(), &payload).is_err());
    }
}
