//! Musixmatch desktop API (apic-desktop.musixmatch.com).
//!
//! Requests carry a desktop "usertoken". One can be configured up front;
//! otherwise a token is requested from `token.get` on first use and kept for
//! the lifetime of the adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use super::{LyricSource, SourceContext};
use crate::lyrics::codec::DecodeError;
use crate::lyrics::parse::{parse_richsync_body, parse_subtitle_body};
use crate::lyrics::types::{DecodedLyrics, LyricsError, LyricsQuery, RawPayload, SourceId, TrackHit};

const BASE_URL: &str = "https://apic-desktop.musixmatch.com/ws/1.1/";
const APP_ID: &str = "web-desktop-app-v1.0";
const TOKEN_ATTEMPTS: usize = 3;
const TOKEN_RETRY_DELAY: Duration = Duration::from_millis(1500);

/// Lyric bodies lifted out of a `macro.subtitles.get` response.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MacroBodies {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    richsync_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subtitle_body: Option<String>,
}

pub struct Musixmatch {
    ctx: SourceContext,
    token: Mutex<Option<String>>,
}

impl Musixmatch {
    pub fn new(ctx: SourceContext, token: Option<String>) -> Self {
        Self {
            ctx,
            token: Mutex::new(token.filter(|t| !t.is_empty())),
        }
    }

    async fn request_token(&self) -> Result<String, LyricsError> {
        let url = format!("{BASE_URL}token.get");
        for attempt in 1..=TOKEN_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(TOKEN_RETRY_DELAY).await;
            }
            let json: Value = self
                .ctx
                .client
                .get(&url)
                .query(&[("app_id", APP_ID), ("t", &cache_buster())])
                .header("Cookie", "x-mxm-token-guid=")
                .send()
                .await?
                .json()
                .await?;

            let status = json.pointer("/message/header/status_code").and_then(Value::as_i64);
            if status == Some(200)
                && let Some(token) = json.pointer("/message/body/user_token").and_then(Value::as_str)
            {
                tracing::info!("Obtained Musixmatch user token");
                return Ok(token.to_string());
            }
            let hint = json.pointer("/message/header/hint").and_then(Value::as_str).unwrap_or("");
            tracing::warn!(attempt, status = ?status, hint, "Musixmatch token request rejected");
        }
        Err(LyricsError::Api("musixmatch: could not obtain a user token".into()))
    }

    async fn token(&self) -> Result<String, LyricsError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.request_token().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// GET `endpoint` with the common parameters. A "renew" hint drops the
    /// cached token and retries once.
    async fn call(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, LyricsError> {
        let url = format!("{BASE_URL}{endpoint}");
        for renewed in [false, true] {
            let token = self.token().await?;
            let resp = self
                .ctx
                .client
                .get(&url)
                .query(params)
                .query(&[
                    ("format", "json"),
                    ("app_id", APP_ID),
                    ("usertoken", token.as_str()),
                    ("t", cache_buster().as_str()),
                ])
                .header("Cookie", format!("x-mxm-token-guid={token}"))
                .send()
                .await?;

            if !resp.status().is_success() {
                return Err(LyricsError::from_status(&format!("musixmatch {endpoint}"), resp.status()));
            }
            let json: Value = resp.json().await?;

            let status = json.pointer("/message/header/status_code").and_then(Value::as_i64);
            let hint = json.pointer("/message/header/hint").and_then(Value::as_str);
            match (status, hint) {
                (Some(401), Some("renew")) if !renewed => {
                    tracing::warn!("Musixmatch token expired, renewing");
                    *self.token.lock().await = None;
                }
                (Some(401), Some("captcha")) => {
                    return Err(LyricsError::Api("musixmatch: captcha required".into()));
                }
                _ => return Ok(json),
            }
        }
        Err(LyricsError::Api("musixmatch: token renewal failed".into()))
    }
}

fn cache_buster() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{nanos:08x}")
}

fn track_to_hit(track: &Value) -> Option<TrackHit> {
    let id = track.get("track_id").and_then(Value::as_u64)?;
    let text = |key: &str| track.get(key).and_then(Value::as_str).unwrap_or("").to_string();
    Some(TrackHit {
        source: SourceId::Musixmatch,
        id: id.to_string(),
        title: text("track_name"),
        artist: text("artist_name"),
        album: text("album_name"),
        duration_ms: track
            .get("track_length")
            .and_then(Value::as_u64)
            .filter(|s| *s > 0)
            .map(|s| s * 1000),
        instrumental: track.get("instrumental").and_then(Value::as_i64) == Some(1),
    })
}

fn status_ok(call: &Value) -> bool {
    call.pointer("/message/header/status_code").and_then(Value::as_i64) == Some(200)
}

/// Pull the richsync and subtitle bodies out of the macro call results.
fn extract_bodies(json: &Value) -> MacroBodies {
    let Some(calls) = json.pointer("/message/body/macro_calls") else {
        return MacroBodies::default();
    };

    let richsync_body = calls
        .get("track.richsync.get")
        .filter(|c| status_ok(c))
        .and_then(|c| c.pointer("/message/body/richsync/richsync_body"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let subtitle_body = calls
        .get("track.subtitles.get")
        .filter(|c| status_ok(c))
        .and_then(|c| c.pointer("/message/body/subtitle_list/0/subtitle/subtitle_body"))
        .and_then(Value::as_str)
        .map(str::to_string);

    MacroBodies {
        richsync_body,
        subtitle_body,
    }
}

#[async_trait]
impl LyricSource for Musixmatch {
    fn id(&self) -> SourceId {
        SourceId::Musixmatch
    }

    fn timeout(&self) -> Duration {
        self.ctx.timeout
    }

    /// `matcher.track.get` returns at most one best match.
    async fn search(&self, query: &LyricsQuery) -> Result<Vec<TrackHit>, LyricsError> {
        let mut params = vec![
            ("q_track", query.title.clone()),
            ("q_artist", query.artist.clone()),
        ];
        if let Some(d) = query.duration {
            params.push(("q_duration", (d.round() as u64).to_string()));
        }
        let json = self.call("matcher.track.get", &params).await?;
        Ok(json
            .pointer("/message/body/track")
            .and_then(track_to_hit)
            .into_iter()
            .collect())
    }

    async fn fetch_lyrics(&self, hit: &TrackHit) -> Result<RawPayload, LyricsError> {
        let params = [
            ("track_id", hit.id.clone()),
            ("namespace", "lyrics_richsynched".to_string()),
            ("optional_calls", "track.richsync".to_string()),
            ("subtitle_format", "mxm".to_string()),
            ("f_subtitle_length_max_deviation", "40".to_string()),
        ];
        let json = self.call("macro.subtitles.get", &params).await?;
        let bodies = extract_bodies(&json);
        if bodies.richsync_body.is_none() && bodies.subtitle_body.is_none() {
            tracing::debug!(track = %hit.id, "No Musixmatch lyric body");
            return Ok(RawPayload::default());
        }
        Ok(RawPayload::new(serde_json::to_vec(&bodies)?))
    }

    fn decode(&self, _hit: &TrackHit, payload: &RawPayload) -> Result<DecodedLyrics, DecodeError> {
        let bodies: MacroBodies = serde_json::from_slice(&payload.content)?;
        let lines = bodies
            .richsync_body
            .as_deref()
            .and_then(parse_richsync_body)
            .filter(|lines| !lines.is_empty())
            .or_else(|| bodies.subtitle_body.as_deref().and_then(parse_subtitle_body))
            .ok_or_else(|| DecodeError::Format("no usable Musixmatch lyric body".into()))?;
        Ok(DecodedLyrics { lines })
    }
}
