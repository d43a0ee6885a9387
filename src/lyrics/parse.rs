//! Text-level parsers for decrypted lyric bodies.
//!
//! All timings are kept in milliseconds. End times are left open when the
//! format does not carry them; normalization closes them later.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::lyrics::codec::{DecodeError, decode_base64};
use crate::lyrics::types::{DecodedLyrics, RawLine, RawWord};

static LRC_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+):(\d{1,2})(?:[.:](\d{1,3}))?\]").unwrap());

static HEADER_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\[(?:ti|ar|al|au|length|by|offset|re|ve|tool|wrd|#|id|sign|kana|language|duration|encoding|total|manufacturer|qq|src|app_name|ver|la):").unwrap()
});

// Bracket tags carrying long encoded blobs, e.g. `[hash:...]`.
static ENCODED_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[[a-zA-Z_]+:[a-zA-Z0-9+/=_-]{20,}\]?$").unwrap());

static SEGMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\][^\[]*").unwrap());

static LINE_SPAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^\[(\d+),(\d+)\](.*)$").unwrap());

static KRC_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(\d+),(\d+),\d+>([^<]*)").unwrap());

static YRC_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d+),(\d+),\d+\)([^(]*)").unwrap());

static QRC_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^()]*?)\((\d+),(\d+)\)").unwrap());

static LYRIC_CONTENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"LyricContent="([^"]*)""#).unwrap());

static XML_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#\d+|amp|lt|gt|quot|apos);").unwrap());

static KRC_LANGUAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[language:([^\]]*)\]").unwrap());

const INSTRUMENTAL_KEYWORDS: [&str; 5] = ["纯音乐", "instrumental", "no lyrics", "没有歌词", "纯音乐请欣赏"];

/// Translation entries closer than this to a line's start are attached to it.
pub const TRANSLATION_TOLERANCE_MS: u64 = 500;

/// Metadata tags (`[ti:]`, `[offset:]`, ...) and encoded blobs that are never lyric lines.
pub fn is_header_tag(line: &str) -> bool {
    HEADER_TAG_RE.is_match(line) || ENCODED_TAG_RE.is_match(line)
}

fn lrc_time_ms(cap: &Captures<'_>) -> u64 {
    let num = |i: usize| {
        cap.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    let fraction = cap.get(3).map_or(0, |m| {
        let digits = m.as_str();
        let value = digits.parse::<u64>().unwrap_or(0);
        match digits.len() {
            1 => value * 100,
            2 => value * 10,
            _ => value,
        }
    });
    num(1)
        .saturating_mul(60_000)
        .saturating_add(num(2).saturating_mul(1000))
        .saturating_add(fraction)
}

// Netease embeds credit lines as `{"t":0,"c":[{"tx":"作词: "},{"tx":"Name"}]}`.
fn parse_json_line(line: &str) -> Option<RawLine> {
    let value: Value = serde_json::from_str(line).ok()?;
    let start = value.get("t")?.as_u64()?;
    let text: String = value
        .get("c")?
        .as_array()?
        .iter()
        .filter_map(|c| c.get("tx").and_then(Value::as_str))
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| RawLine::new(start, text))
}

/// Parse line-synced LRC.
///
/// Lines with several timestamps are repeated. Empty timed lines close the
/// line before them.
pub fn parse_lrc(text: &str) -> Vec<RawLine> {
    let mut entries: Vec<(u64, String)> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || is_header_tag(line) {
            continue;
        }
        if line.starts_with('{') {
            if let Some(raw) = parse_json_line(line) {
                entries.push((raw.start_ms, raw.text));
            }
            continue;
        }
        let stamps: Vec<u64> = LRC_TIME_RE.captures_iter(line).map(|c| lrc_time_ms(&c)).collect();
        if stamps.is_empty() {
            continue;
        }
        let body = LRC_TIME_RE.replace_all(line, "").trim().to_string();
        for start in stamps {
            entries.push((start, body.clone()));
        }
    }
    entries.sort_by_key(|(start, _)| *start);

    let mut lines: Vec<RawLine> = Vec::with_capacity(entries.len());
    for (start, body) in entries {
        if body.is_empty() {
            if let Some(prev) = lines.last_mut()
                && prev.end_ms.is_none()
                && start > prev.start_ms
            {
                prev.end_ms = Some(start);
            }
            continue;
        }
        lines.push(RawLine::new(start, body));
    }
    lines
}

/// Parse a translation LRC into `(start_ms, text)` pairs.
pub fn parse_translation_lrc(text: &str) -> Vec<(u64, String)> {
    parse_lrc(text)
        .into_iter()
        .filter(|l| l.text != "/" && !l.text.starts_with("//"))
        .map(|l| (l.start_ms, l.text))
        .collect()
}

/// Attach each translation to the single closest line within the tolerance.
pub fn attach_translations(lines: &mut [RawLine], translations: &[(u64, String)]) {
    for (at, text) in translations {
        let best = lines
            .iter_mut()
            .map(|line| (line.start_ms.abs_diff(*at), line))
            .filter(|(diff, _)| *diff <= TRANSLATION_TOLERANCE_MS)
            .min_by_key(|(diff, _)| *diff);
        if let Some((_, line)) = best {
            line.translation = Some(text.clone());
        }
    }
}

fn unescape_xml(text: &str) -> String {
    XML_ENTITY_RE
        .replace_all(text, |cap: &Captures<'_>| {
            let entity = &cap[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                    u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
                }
                _ => entity[1..].parse::<u32>().ok().and_then(char::from_u32),
            };
            decoded.map_or_else(|| cap[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

/// Pull the lyric text out of a QRC XML envelope. Non-XML input is returned as is.
pub fn extract_qrc_content(xml: &str) -> String {
    match LYRIC_CONTENT_RE.captures(xml) {
        Some(cap) => unescape_xml(&cap[1]),
        None => xml.to_string(),
    }
}

fn parse_words(content: &str, line_start: u64) -> Vec<RawWord> {
    let to_u64 = |s: &str| s.parse::<u64>().unwrap_or(0);

    if KRC_WORD_RE.is_match(content) {
        return KRC_WORD_RE
            .captures_iter(content)
            .filter(|c| !c[3].is_empty())
            .map(|c| {
                let start = line_start + to_u64(&c[1]);
                RawWord { start_ms: start, end_ms: start + to_u64(&c[2]), text: c[3].to_string() }
            })
            .collect();
    }
    if YRC_WORD_RE.is_match(content) {
        return YRC_WORD_RE
            .captures_iter(content)
            .filter(|c| !c[3].is_empty())
            .map(|c| {
                let start = to_u64(&c[1]);
                RawWord { start_ms: start, end_ms: start + to_u64(&c[2]), text: c[3].to_string() }
            })
            .collect();
    }
    QRC_WORD_RE
        .captures_iter(content)
        .filter(|c| !c[1].is_empty())
        .map(|c| {
            let start = to_u64(&c[2]);
            RawWord { start_ms: start, end_ms: start + to_u64(&c[3]), text: c[1].to_string() }
        })
        .collect()
}

fn parse_segment(segment: &str) -> Option<RawLine> {
    let (start, end, content) = if let Some(cap) = LINE_SPAN_RE.captures(segment) {
        let start = cap[1].parse::<u64>().ok()?;
        let dur = cap[2].parse::<u64>().ok()?;
        (start, Some(start + dur), cap.get(3).map_or("", |m| m.as_str()))
    } else {
        let cap = LRC_TIME_RE.captures(segment)?;
        let whole = cap.get(0)?;
        if whole.start() != 0 {
            return None;
        }
        (lrc_time_ms(&cap), None, &segment[whole.end()..])
    };

    let words = parse_words(content, start);
    let text = if words.is_empty() {
        content.trim().to_string()
    } else {
        words.iter().map(|w| w.text.as_str()).collect::<String>().trim().to_string()
    };
    if text.is_empty() {
        return None;
    }
    Some(RawLine { start_ms: start, end_ms: end, text, words, translation: None })
}

/// Parse `[start,duration]` bodies: QRC `word(start,dur)`, KRC
/// `<offset,dur,0>word` and Netease YRC `(start,dur,0)word`. Plain LRC
/// segments mixed into such bodies are accepted too.
pub fn parse_timed_body(text: &str) -> Vec<RawLine> {
    let mut lines = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('{') {
            lines.extend(parse_json_line(line));
            continue;
        }
        for segment in SEGMENT_RE.find_iter(line) {
            let segment = segment.as_str().trim();
            if is_header_tag(segment) {
                continue;
            }
            lines.extend(parse_segment(segment));
        }
    }
    lines.sort_by_key(|l| l.start_ms);
    lines
}

/// Decode a QRC XML body with an optional translation LRC.
pub fn parse_qrc(xml: &str, translation: Option<&str>) -> DecodedLyrics {
    let mut lines = parse_timed_body(&extract_qrc_content(xml));
    if let Some(trans) = translation {
        attach_translations(&mut lines, &parse_translation_lrc(&extract_qrc_content(trans)));
    }
    DecodedLyrics { lines }
}

// `[language:<base64 json>]`; entries of type 1 hold one translation per line.
fn krc_translations(text: &str) -> Vec<String> {
    let Some(cap) = KRC_LANGUAGE_RE.captures(text) else {
        return Vec::new();
    };
    let Ok(json) = decode_base64(&cap[1]) else {
        return Vec::new();
    };
    let Ok(value) = serde_json::from_slice::<Value>(&json) else {
        return Vec::new();
    };
    value
        .get("content")
        .and_then(Value::as_array)
        .and_then(|content| {
            content
                .iter()
                .find(|c| c.get("type").and_then(Value::as_i64) == Some(1))
        })
        .and_then(|c| c.get("lyricContent").and_then(Value::as_array))
        .map(|rows| {
            rows.iter()
                .map(|row| match row {
                    Value::Array(parts) => parts.iter().filter_map(Value::as_str).collect::<String>(),
                    Value::String(s) => s.clone(),
                    _ => String::new(),
                })
                .collect::<Vec<String>>()
        })
        .unwrap_or_default()
}

/// Decode a KRC body, attaching embedded translations by line index.
pub fn parse_krc(text: &str) -> DecodedLyrics {
    let mut lines = parse_timed_body(text);
    for (line, trans) in lines.iter_mut().zip(krc_translations(text)) {
        let trans = trans.trim();
        if !trans.is_empty() {
            line.translation = Some(trans.to_string());
        }
    }
    DecodedLyrics { lines }
}

fn lyric_field<'a>(json: &'a Value, key: &str) -> Option<&'a str> {
    json.get(key)
        .and_then(|v| v.get("lyric"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Decode Netease's lyric JSON: `yrc` word timing when present, else `lrc`,
/// with `tlyric` translations.
pub fn parse_netease(json: &Value) -> Result<DecodedLyrics, DecodeError> {
    let code = json.get("code").and_then(Value::as_i64).unwrap_or(200);
    if code != 200 {
        return Err(DecodeError::Format(format!("netease lyric response code {code}")));
    }
    if json.get("uncollected").and_then(Value::as_bool).unwrap_or(false) {
        return Err(DecodeError::Format("netease has not collected lyrics for this track".into()));
    }
    if json.get("nolyric").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(DecodedLyrics::default());
    }

    let mut lines = match lyric_field(json, "yrc") {
        Some(yrc) => parse_timed_body(yrc),
        None => Vec::new(),
    };
    if !lines.iter().any(|l| !l.words.is_empty()) {
        lines = lyric_field(json, "lrc").map(parse_lrc).unwrap_or_default();
    }
    if let Some(trans) = lyric_field(json, "tlyric") {
        attach_translations(&mut lines, &parse_translation_lrc(trans));
    }
    Ok(DecodedLyrics { lines })
}

fn secs_to_ms(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0).round() as u64
}

/// Parse a Musixmatch `richsync_body` JSON array into word-timed lines.
pub fn parse_richsync_body(richsync_body: &str) -> Option<Vec<RawLine>> {
    let value = serde_json::from_str::<Value>(richsync_body).ok()?;
    let arr = value.as_array()?;
    let mut lines = Vec::with_capacity(arr.len());
    for line in arr {
        let ts = line.get("ts").and_then(Value::as_f64)?;
        let te = line.get("te").and_then(Value::as_f64).unwrap_or(ts + 3.0);
        let text = line
            .get("x")
            .and_then(Value::as_str)
            .or_else(|| line.get("text").and_then(Value::as_str))
            .unwrap_or("")
            .trim();
        if text.is_empty() {
            continue;
        }

        // Character groups carry offsets from the line start; a group ends
        // where the next one begins.
        let mut words = Vec::new();
        if let Some(groups) = line.get("l").and_then(Value::as_array) {
            for (i, group) in groups.iter().enumerate() {
                let chars = group.get("c").and_then(Value::as_str).unwrap_or("");
                if chars.trim().is_empty() {
                    continue;
                }
                let start = ts + group.get("o").and_then(Value::as_f64).unwrap_or(0.0);
                let end = groups
                    .get(i + 1)
                    .and_then(|next| next.get("o").and_then(Value::as_f64))
                    .map(|o| ts + o)
                    .filter(|&end| end > start)
                    .unwrap_or(te);
                words.push(RawWord {
                    start_ms: secs_to_ms(start),
                    end_ms: secs_to_ms(end),
                    text: chars.to_string(),
                });
            }
        }
        lines.push(RawLine {
            start_ms: secs_to_ms(ts),
            end_ms: Some(secs_to_ms(te)),
            text: text.to_string(),
            words,
            translation: None,
        });
    }
    Some(lines)
}

/// Parse a Musixmatch `subtitle_body` (mxm format) into line-timed lines.
pub fn parse_subtitle_body(subtitle_body: &str) -> Option<Vec<RawLine>> {
    let value = serde_json::from_str::<Value>(subtitle_body).ok()?;
    let lines = value
        .as_array()?
        .iter()
        .filter_map(|line| {
            let t = line.pointer("/time/total").and_then(Value::as_f64)?;
            let text = line.get("text").and_then(Value::as_str)?.trim();
            (!text.is_empty()).then(|| RawLine::new(secs_to_ms(t), text))
        })
        .collect();
    Some(lines)
}

/// Empty bodies and short "instrumental, please enjoy" notices.
pub fn is_instrumental_body(lines: &[RawLine]) -> bool {
    if lines.iter().all(|l| l.text.trim().is_empty()) {
        return true;
    }
    if lines.len() <= 2 {
        let joined = lines
            .iter()
            .map(|l| l.text.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        return INSTRUMENTAL_KEYWORDS.iter().any(|k| joined.contains(k));
    }
    false
}
