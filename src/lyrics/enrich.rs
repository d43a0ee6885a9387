//! External collaborators used around the core pipeline: the AI enricher
//! (translation, romanization, explicit flags) and the title translator
//! used by the matcher's fallback pass.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::EnrichConfig;
use crate::lyrics::types::{LyricsDocument, LyricsError};

/// Bodies longer than this are returned without enrichment.
pub const MAX_ENRICH_CHARS: usize = 2000;

const GTX_URL: &str = "https://translate.googleapis.com/translate_a/single";

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("no enrichment client configured")]
    NoClient,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("API error: {0}")]
    Api(String),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("enrichment timed out after {0:?}")]
    Timeout(Duration),
}

/// Caller-supplied (BYOK) enrichment credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Fill in translations, romanization and explicit flags.
    async fn enrich(
        &self,
        doc: LyricsDocument,
        client: Option<&ClientConfig>,
        style: Option<&str>,
    ) -> Result<LyricsDocument, EnrichError>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target: &str) -> Result<String, LyricsError>;
}

/// Rough script-based language guess: `ja`, `ko`, `zh` or `en`.
pub fn detect_language(text: &str) -> &'static str {
    let has = |lo: char, hi: char| text.chars().any(|c| (lo..=hi).contains(&c));
    if has('\u{3040}', '\u{30ff}') {
        "ja"
    } else if has('\u{ac00}', '\u{d7af}') {
        "ko"
    } else if has('\u{4e00}', '\u{9fff}') {
        "zh"
    } else {
        "en"
    }
}

#[derive(Debug, Default, Deserialize)]
struct LineEnrichment {
    #[serde(default)]
    trans: Option<String>,
    #[serde(default)]
    romaji: Option<String>,
    #[serde(default)]
    explicit: Option<bool>,
}

/// Decode the model's JSON object. Entries that do not fit the line shape
/// are skipped instead of failing the whole batch.
fn parse_results(content: &str) -> Result<HashMap<String, LineEnrichment>, EnrichError> {
    let raw: HashMap<String, Value> = serde_json::from_str(content)?;
    Ok(raw
        .into_iter()
        .filter_map(|(id, value)| match serde_json::from_value(value) {
            Ok(info) => Some((id, info)),
            Err(e) => {
                tracing::debug!(line = %id, error = %e, "Skipping malformed enrichment entry");
                None
            }
        })
        .collect())
}

/// OpenAI-compatible chat-completions enricher.
pub struct OpenAiEnricher {
    http: Client,
    config: EnrichConfig,
}

struct Endpoint<'a> {
    api_key: &'a str,
    base_url: &'a str,
    model: &'a str,
}

impl OpenAiEnricher {
    pub fn new(http: Client, config: EnrichConfig) -> Self {
        Self { http, config }
    }

    /// Caller credentials win over the server's own key.
    fn endpoint<'a>(&'a self, client: Option<&'a ClientConfig>) -> Option<Endpoint<'a>> {
        if let Some(c) = client.filter(|c| !c.api_key.is_empty()) {
            return Some(Endpoint {
                api_key: &c.api_key,
                base_url: c.base_url.as_deref().unwrap_or(&self.config.base_url),
                model: c.model.as_deref().unwrap_or(&self.config.model),
            });
        }
        self.config.api_key.as_deref().filter(|k| !k.is_empty()).map(|api_key| Endpoint {
            api_key,
            base_url: &self.config.base_url,
            model: &self.config.model,
        })
    }

    async fn call(&self, endpoint: &Endpoint<'_>, request: &Value) -> Result<HashMap<String, LineEnrichment>, EnrichError> {
        let url = format!("{}/chat/completions", endpoint.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(endpoint.api_key)
            .json(request)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EnrichError::Api(format!("chat completions: HTTP {}", resp.status())));
        }
        let body: Value = resp.json().await?;
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| EnrichError::Api("response has no message content".into()))?;
        parse_results(content)
    }
}

fn build_request(doc: &LyricsDocument, model: &str, target_lang: &str, romaji: bool, style: Option<&str>) -> Value {
    let style_prompt = match style {
        Some(s) => format!(" User style requirement: {s}"),
        None => " Keep the translation neutral, accurate, and concise.".to_string(),
    };
    let romaji_prompt = if romaji { "romanized pronunciation" } else { "null" };
    let system = format!(
        "You are a lyrics metadata engine. Output a JSON object keyed by the 'id' of each line. \
         For each line provide 'trans' (translation to {target_lang}), 'romaji' ({romaji_prompt}) \
         and 'explicit' (true if the line contains profanity, sexual or violent content). \
         Output strictly valid JSON.{style_prompt}"
    );
    let lines: Vec<Value> = doc
        .lines
        .iter()
        .enumerate()
        .map(|(id, line)| json!({"id": id, "txt": line.text}))
        .collect();
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": Value::Array(lines).to_string()},
        ],
        "response_format": {"type": "json_object"},
    })
}

/// Merge per-line results into the document. A style request overrides
/// translations the source already had.
fn merge(doc: &mut LyricsDocument, results: HashMap<String, LineEnrichment>, style: bool) -> usize {
    let mut updated = 0;
    for (id, line) in doc.lines.iter_mut().enumerate() {
        let Some(info) = results.get(&id.to_string()) else { continue };
        if let Some(trans) = info.trans.as_deref().filter(|t| !t.trim().is_empty())
            && (line.translation.is_none() || style)
        {
            line.translation = Some(trans.to_string());
        }
        if line.romaji.is_none()
            && let Some(romaji) = info.romaji.as_deref().filter(|r| !r.trim().is_empty())
        {
            line.romaji = Some(romaji.to_string());
        }
        line.explicit |= info.explicit.unwrap_or(false);
        updated += 1;
    }
    updated
}

#[async_trait]
impl Enricher for OpenAiEnricher {
    async fn enrich(
        &self,
        mut doc: LyricsDocument,
        client: Option<&ClientConfig>,
        style: Option<&str>,
    ) -> Result<LyricsDocument, EnrichError> {
        let endpoint = self.endpoint(client).ok_or(EnrichError::NoClient)?;

        let body: String = doc.lines.iter().map(|l| l.text.as_str()).collect();
        let chars = body.chars().count();
        if chars > MAX_ENRICH_CHARS {
            tracing::warn!(chars, "Lyrics too long for enrichment, skipping");
            return Ok(doc);
        }
        if doc.lines.is_empty() {
            return Ok(doc);
        }

        let sample: String = body.chars().take(200).collect();
        let lang = detect_language(&sample);
        let romaji = matches!(lang, "ja" | "ko");
        tracing::debug!(lang, lines = doc.lines.len(), "Enriching lyrics");

        let request = build_request(&doc, endpoint.model, &self.config.target_lang, romaji, style);
        let results = self.call(&endpoint, &request).await?;
        let updated = merge(&mut doc, results, style.is_some());
        tracing::info!(updated, "Enriched lyrics");
        Ok(doc)
    }
}

/// Google's public web translation endpoint.
pub struct GoogleTranslator {
    http: Client,
}

impl GoogleTranslator {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

/// Concatenate the translated segments of a `translate_a/single` response.
fn parse_gtx(body: &Value) -> Option<String> {
    let segments = body.get(0)?.as_array()?;
    let text: String = segments
        .iter()
        .filter_map(|s| s.get(0).and_then(Value::as_str))
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate(&self, text: &str, target: &str) -> Result<String, LyricsError> {
        let resp = self
            .http
            .get(GTX_URL)
            .query(&[("client", "gtx"), ("sl", "auto"), ("tl", target), ("dt", "t"), ("q", text)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(LyricsError::Translate(format!("HTTP {}", resp.status())));
        }
        let body: Value = resp.json().await?;
        parse_gtx(&body).ok_or_else(|| LyricsError::Translate("empty translation".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::types::{DocumentType, SourceId, SyllableLine};
    use std::collections::BTreeMap;

    fn doc(lines: &[&str]) -> LyricsDocument {
        LyricsDocument {
            doc_type: DocumentType::Line,
            source: SourceId::Qq,
            match_score: 90,
            lines: lines
                .iter()
                .enumerate()
                .map(|(i, t)| SyllableLine {
                    start_ms: i as u64 * 1000,
                    end_ms: i as u64 * 1000 + 900,
                    text: t.to_string(),
                    words: Vec::new(),
                    translation: None,
                    romaji: None,
                    explicit: false,
                })
                .collect(),
            credits: BTreeMap::new(),
        }
    }

    #[test]
    fn language_detection_by_script() {
        assert_eq!(detect_language("君の名は"), "ja");
        assert_eq!(detect_language("사랑해"), "ko");
        assert_eq!(detect_language("晴天"), "zh");
        assert_eq!(detect_language("hello"), "en");
    }

    #[test]
    fn merge_respects_existing_translations_unless_styled() {
        let mut d = doc(&["hello", "damn"]);
        d.lines[0].translation = Some("你好".into());
        let results: HashMap<String, LineEnrichment> = serde_json::from_value(json!({
            "0": {"trans": "哈喽", "romaji": null, "explicit": false},
            "1": {"trans": "该死", "explicit": true}
        }))
        .unwrap();
        assert_eq!(merge(&mut d, results, false), 2);
        assert_eq!(d.lines[0].translation.as_deref(), Some("你好"));
        assert_eq!(d.lines[1].translation.as_deref(), Some("该死"));
        assert!(d.lines[1].explicit);

        let results: HashMap<String, LineEnrichment> =
            serde_json::from_value(json!({"0": {"trans": "哈喽"}})).unwrap();
        merge(&mut d, results, true);
        assert_eq!(d.lines[0].translation.as_deref(), Some("哈喽"));
    }

    #[test]
    fn null_flags_and_bad_entries_do_not_fail_the_batch() {
        let content = r#"{
            "0": {"trans": "你好", "romaji": null, "explicit": null},
            "1": {"trans": ["not", "a", "string"]},
            "2": {"trans": "该死", "explicit": true}
        }"#;
        let results = parse_results(content).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results["0"].explicit, None);

        let mut d = doc(&["hello", "???", "damn"]);
        assert_eq!(merge(&mut d, results, false), 2);
        assert_eq!(d.lines[0].translation.as_deref(), Some("你好"));
        assert!(!d.lines[0].explicit);
        assert!(d.lines[1].translation.is_none());
        assert!(d.lines[2].explicit);

        assert!(parse_results("not json").is_err());
    }

    #[test]
    fn request_asks_for_romaji_only_when_needed() {
        let d = doc(&["君の名は"]);
        let req = build_request(&d, "gpt-4o-mini", "zh", true, Some("poetic"));
        let system = req.pointer("/messages/0/content").and_then(Value::as_str).unwrap();
        assert!(system.contains("romanized pronunciation"));
        assert!(system.contains("poetic"));
        assert_eq!(req["model"], "gpt-4o-mini");
    }

    #[test]
    fn client_config_overrides_server_key() {
        let enricher = OpenAiEnricher::new(
            Client::new(),
            EnrichConfig {
                api_key: Some("server".into()),
                ..EnrichConfig::default()
            },
        );
        let byok = ClientConfig {
            api_key: "mine".into(),
            base_url: Some("https://llm.example/v1".into()),
            model: None,
        };
        let ep = enricher.endpoint(Some(&byok)).unwrap();
        assert_eq!(ep.api_key, "mine");
        assert_eq!(ep.base_url, "https://llm.example/v1");
        assert_eq!(ep.model, "gpt-4o-mini");
        assert_eq!(enricher.endpoint(None).unwrap().api_key, "server");

        let keyless = OpenAiEnricher::new(Client::new(), EnrichConfig::default());
        assert!(keyless.endpoint(None).is_none());
    }

    #[tokio::test]
    async fn missing_key_and_long_bodies_skip_the_network() {
        let keyless = OpenAiEnricher::new(Client::new(), EnrichConfig::default());
        assert!(matches!(keyless.enrich(doc(&["a"]), None, None).await, Err(EnrichError::NoClient)));

        let enricher = OpenAiEnricher::new(
            Client::new(),
            EnrichConfig {
                api_key: Some("k".into()),
                base_url: "http://127.0.0.1:9".into(),
                ..EnrichConfig::default()
            },
        );
        let long = "x".repeat(MAX_ENRICH_CHARS + 1);
        let out = enricher.enrich(doc(&[&long]), None, None).await.unwrap();
        assert!(out.lines[0].translation.is_none());
    }

    #[test]
    fn gtx_segments_are_joined() {
        let body = json!([[["反英雄", "Anti-Hero", null, null, 10]], null, "en"]);
        assert_eq!(parse_gtx(&body).as_deref(), Some("反英雄"));
        assert_eq!(parse_gtx(&json!([])), None);
    }
}
