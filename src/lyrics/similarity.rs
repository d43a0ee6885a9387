//! String similarity used to rank platform search hits against a query.
//!
//! Every public scorer returns a value in `0.0..=100.0`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[-(]|\s-\s|\s)(remix|live|acoustic|instrumental|radio\sedit|remastered|explicit|clean|unplugged|re-recorded|edit|version|mono|stereo|deluxe|anniversary|reprise|demo|伴奏|现场)(?:\W|$)").unwrap()
});
static BRACKETS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]|【[^】]*】").unwrap());
static PARENS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)|（[^）]*）").unwrap());
static DASH_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s-\s.*").unwrap());
static ARTIST_SPLIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:&|,|;|、|\b(?:feat|ft|vs|x)\b\.?)\s*").unwrap()
});

/// Lowercase, drop punctuation and collapse whitespace.
pub fn normalize_string(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let lower = s.to_lowercase();
    let replaced = NON_WORD_RE.replace_all(&lower, " ");
    WS_RE.replace_all(&replaced, " ").trim().to_string()
}

fn bigrams(s: &str) -> BTreeSet<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

fn dice_coefficient(a: &str, b: &str) -> f64 {
    let a_grams = bigrams(a);
    let b_grams = bigrams(b);
    if a_grams.is_empty() && b_grams.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    if a_grams.is_empty() || b_grams.is_empty() {
        return 0.0;
    }
    let inter = a_grams.intersection(&b_grams).count() as f64;
    (2.0 * inter) / ((a_grams.len() + b_grams.len()) as f64)
}

fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    if s1 == s2 {
        return 0;
    }
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=a.len()).collect();
    let mut curr: Vec<usize> = vec![0; a.len() + 1];
    for (j, bj) in b.iter().enumerate() {
        curr[0] = j + 1;
        for (i, ai) in a.iter().enumerate() {
            let cost = if ai == bj { 0 } else { 1 };
            curr[i + 1] = (prev[i + 1] + 1).min(curr[i] + 1).min(prev[i] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[a.len()]
}

/// Normalized edit-distance similarity of two already-normalized strings.
pub fn ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100.0;
    }
    100.0 * (1.0 - levenshtein_distance(a, b) as f64 / max_len as f64)
}

/// Order-insensitive similarity over whitespace tokens.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return if ta == tb { 100.0 } else { 0.0 };
    }
    let join = |set: BTreeSet<&str>| set.into_iter().collect::<Vec<_>>().join(" ");
    let common = join(ta.intersection(&tb).copied().collect());
    let only_a = join(ta.difference(&tb).copied().collect());
    let only_b = join(tb.difference(&ta).copied().collect());
    let with = |rest: &str| match (common.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => common.clone(),
        (false, false) => format!("{common} {rest}"),
    };
    let full_a = with(&only_a);
    let full_b = with(&only_b);

    let mut best = ratio(&full_a, &full_b);
    if !common.is_empty() {
        best = best.max(ratio(&common, &full_a)).max(ratio(&common, &full_b));
    }
    best
}

/// Split a title into its base form and version tags (live, remix, ...).
fn analyze_title(title: &str) -> (String, BTreeSet<String>) {
    let lower = title.to_lowercase();
    let tags = TAG_RE
        .captures_iter(&lower)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().replace(' ', "")))
        .collect();

    let base = BRACKETS_RE.replace_all(&lower, " ");
    let base = PARENS_RE.replace_all(&base, " ");
    let base = DASH_SUFFIX_RE.replace_all(&base, "");
    let base = TAG_RE.replace_all(&base, " ");
    (normalize_string(&base), tags)
}

/// Title similarity: base-title closeness plus a bonus or penalty for
/// matching or conflicting version tags.
pub fn title_similarity(query: &str, candidate: &str) -> f64 {
    let (base1, tags1) = analyze_title(query);
    let (base2, tags2) = analyze_title(candidate);
    if base1.is_empty() && base2.is_empty() {
        return ratio(&normalize_string(query), &normalize_string(candidate));
    }
    let base_score = dice_coefficient(&base1, &base2) * 60.0 + ratio(&base1, &base2) * 0.4;
    let tag_score = if tags1.is_empty() && tags2.is_empty() {
        0.0
    } else if tags1 == tags2 {
        5.0
    } else if tags1.is_disjoint(&tags2) {
        -25.0
    } else {
        -10.0
    };
    (base_score + tag_score).clamp(0.0, 100.0)
}

/// Individual performer names, lowercased, without a leading "the".
pub fn split_artists(artist: &str) -> Vec<String> {
    let lower = artist.to_lowercase();
    let cleaned = BRACKETS_RE.replace_all(&lower, " ");
    let cleaned = PARENS_RE.replace_all(&cleaned, " ");
    ARTIST_SPLIT_RE
        .split(&cleaned)
        .map(normalize_string)
        .map(|name| name.strip_prefix("the ").map(str::to_string).unwrap_or(name))
        .filter(|name| !name.is_empty())
        .collect()
}

fn normalize_artist_name(artist: &str) -> String {
    let mut parts = split_artists(artist);
    parts.sort();
    parts.join(" ")
}

/// Artist similarity: mean of plain and token-set similarity.
pub fn artist_similarity(query: &str, candidate: &str) -> f64 {
    let n1 = normalize_artist_name(query);
    let n2 = normalize_artist_name(candidate);
    if n1.is_empty() || n2.is_empty() {
        return 0.0;
    }
    if n1 == n2 {
        return 100.0;
    }
    (ratio(&n1, &n2) + token_set_ratio(&n1, &n2)) / 2.0
}

pub fn album_similarity(query: &str, candidate: &str) -> f64 {
    let (a, b) = (normalize_string(query), normalize_string(candidate));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    ratio(&a, &b).max(token_set_ratio(&a, &b))
}

/// First performer of a multi-artist credit, or `None` when there is only one.
pub fn simplify_artist(artist: &str) -> Option<String> {
    let mut parts = ARTIST_SPLIT_RE.split(artist.trim()).filter(|p| !p.trim().is_empty());
    let first = parts.next()?.trim().to_string();
    parts.next().map(|_| first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_titles_score_full() {
        assert_eq!(title_similarity("Anti-Hero", "Anti-Hero"), 100.0);
        assert_eq!(title_similarity("晴天", "晴天"), 100.0);
    }

    #[test]
    fn conflicting_version_tags_are_penalised() {
        let studio = title_similarity("Anti-Hero", "Anti-Hero");
        let live = title_similarity("Anti-Hero (Live)", "Anti-Hero (Acoustic)");
        assert!(live < studio - 20.0, "live={live}");
    }

    #[test]
    fn artist_order_and_featuring_do_not_matter() {
        assert_eq!(artist_similarity("Taylor Swift & Bon Iver", "Bon Iver, Taylor Swift"), 100.0);
        assert!(artist_similarity("The Weeknd", "Weeknd") > 99.0);
        assert!(artist_similarity("Taylor Swift", "Ed Sheeran") < 50.0);
    }

    #[test]
    fn token_set_ignores_extra_tokens() {
        assert_eq!(token_set_ratio("taylor swift", "swift taylor"), 100.0);
        assert_eq!(token_set_ratio("taylor swift", "taylor swift bon iver"), 100.0);
    }

    #[test]
    fn simplify_only_multi_artist_credits() {
        assert_eq!(simplify_artist("Taylor Swift feat. Bon Iver").as_deref(), Some("Taylor Swift"));
        assert_eq!(simplify_artist("周杰伦、方文山").as_deref(), Some("周杰伦"));
        assert_eq!(simplify_artist("Taylor Swift"), None);
    }

    #[test]
    fn scores_stay_in_range() {
        for (a, b) in [("", ""), ("a", ""), ("Hello (Remix)", "Goodbye"), ("x", "xxxxxxxxxxxxxxxx")] {
            for s in [title_similarity(a, b), artist_similarity(a, b), album_similarity(a, b)] {
                assert!((0.0..=100.0).contains(&s), "{a:?} {b:?} -> {s}");
            }
        }
    }
}
