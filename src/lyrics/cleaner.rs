//! Credit stripping.
//!
//! Only the first and last [`WINDOW`] lines of a body are scanned with the
//! strict patterns. Lines starting at exactly 0 ms are scanned everywhere
//! with a broader pattern set, since a zero timestamp marks a non-sung line.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::lyrics::parse::is_header_tag;
use crate::lyrics::types::{CreditRole, RawLine, SyllableLine};

pub const WINDOW: usize = 12;

/// A timed line the credit scanner can look at.
pub trait ScannedLine {
    fn start_ms(&self) -> u64;
    fn text(&self) -> &str;
}

impl ScannedLine for RawLine {
    fn start_ms(&self) -> u64 {
        self.start_ms
    }

    fn text(&self) -> &str {
        &self.text
    }
}

impl ScannedLine for SyllableLine {
    fn start_ms(&self) -> u64 {
        self.start_ms
    }

    fn text(&self) -> &str {
        &self.text
    }
}

struct RolePatterns {
    role: CreditRole,
    strict: Vec<Regex>,
    broad: Vec<Regex>,
}

/// `nouns` take a colon ("Music: X"); `verb` is the participle that takes
/// "by" ("Composed by X").
fn role_patterns(role: CreditRole, nouns: &str, verb: &str, zh: &str) -> RolePatterns {
    let re = |p: String| Regex::new(&p).unwrap();
    RolePatterns {
        role,
        strict: vec![
            re(format!(r"(?i)^(?:{nouns}|{verb})\s*[:：]\s*(\S.*)$")),
            re(format!(r"(?i)^(?:{verb})\s+by\s+(\S.*)$")),
            re(format!(r"^(?:{zh})\s*[:：]\s*(\S.*)$")),
            re(format!(r"^(?:{zh})\s+(\S.*)$")),
        ],
        broad: vec![
            re(format!(r"(?i)^(?:{nouns}|{verb})\b\s*(?:[:：\-]|\bby\b)?\s*(\S.*)$")),
            re(format!(r"^(?:{zh})\s*[:：\-]?\s*(\S.*)$")),
        ],
    }
}

static ROLES: Lazy<Vec<RolePatterns>> = Lazy::new(|| {
    vec![
        role_patterns(CreditRole::Lyricist, "lyricist|lyrics|lyric|words", "written", "作词|填词|词"),
        role_patterns(CreditRole::Composer, "composer|music", "composed", "作曲|谱曲|曲"),
        role_patterns(CreditRole::Arranger, "arranger|arrangement", "arranged", "编曲"),
        role_patterns(
            CreditRole::Producer,
            r"(?:executive\s+)?producer|production",
            "produced",
            "制作人|制作|监制",
        ),
    ]
});

// Credit lines with no role of their own; removed, not recorded.
static OTHER_STRICT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(?:title|artist|album|by|mixing|mastering|vocals?|guitar|bass|drums|keyboards?|harmony|backing vocals|recording|studio|label|issued|piano|strings?)\s*[:：]\s*\S.*$",
        r"^(?:混音|母带|吉他|吉它|贝斯|贝司|鼓|键盘|弦乐|和声|录音|发行|演唱|出品|统筹|企划)\s*[:：]\s*\S.*$",
        r"(?i)^(?:mixed|mastered|recorded)\s+(?:by|at)\s+\S.*$",
        r"^(?:℗|©)\s*\d{4}",
        r"TME.*著作权|腾讯音乐|版权声明|未经.*许可",
    ]
    .into_iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static OTHER_BROAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:title|artist|album|by|offset|歌名|歌手|专辑)\b").unwrap());

/// Result of classifying one line.
#[derive(Debug, PartialEq)]
enum Credit {
    Role(CreditRole, String),
    Other,
}

fn classify(text: &str, broad: bool) -> Option<Credit> {
    if is_header_tag(text) {
        return Some(Credit::Other);
    }
    for role in ROLES.iter() {
        if let Some(cap) = role.strict.iter().find_map(|re| re.captures(text)) {
            return Some(Credit::Role(role.role, cap[1].trim().to_string()));
        }
    }
    if OTHER_STRICT.iter().any(|re| re.is_match(text)) {
        return Some(Credit::Other);
    }
    if !broad {
        return None;
    }
    for role in ROLES.iter() {
        if let Some(cap) = role.broad.iter().find_map(|re| re.captures(text)) {
            return Some(Credit::Role(role.role, cap[1].trim().to_string()));
        }
    }
    OTHER_BROAD.is_match(text).then_some(Credit::Other)
}

/// Remove credit lines from `lines`, returning the first value found per role.
pub fn strip_credits<L: ScannedLine>(lines: Vec<L>) -> (Vec<L>, BTreeMap<CreditRole, String>) {
    let total = lines.len();
    let tail_start = total.saturating_sub(WINDOW);
    let mut credits = BTreeMap::new();
    let mut kept = Vec::with_capacity(total);

    for (i, line) in lines.into_iter().enumerate() {
        let text = line.text().trim();
        let in_window = i < WINDOW || i >= tail_start;
        let zero = line.start_ms() == 0;
        let found = if in_window || zero { classify(text, zero) } else { None };

        match found {
            Some(Credit::Role(role, value)) => {
                tracing::debug!(line = i, ?role, text, "Moved credit line");
                credits.entry(role).or_insert(value);
            }
            Some(Credit::Other) => {
                tracing::debug!(line = i, text, "Dropped metadata line");
            }
            None => kept.push(line),
        }
    }
    (kept, credits)
}
