//! Restore masked profanity ("f**k", "sh*t") in lyric text.
//!
//! Compound words come first so "bullsh*t" is not half-restored by the
//! shorter "sh*t" rule.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::lyrics::types::SyllableLine;

// (masked stem, restored word). Stems are matched case-insensitively at a
// word start; `*` runs are written as `\*+` or a fixed count.
const TABLE: &[(&str, &str)] = &[
    (r"motherf\*+king", "motherfucking"),
    (r"motherf\*+kin", "motherfuckin"),
    (r"motherf\*+ing", "motherfucking"),
    (r"motherf\*+in", "motherfuckin"),
    (r"motherf\*+r", "motherfucker"),
    (r"motherf\*+er", "motherfucker"),
    (r"motherf\*+k", "motherfucker"),
    (r"m\*therf\*+er", "motherfucker"),
    (r"bullsh\*+t", "bullshit"),
    (r"bullsh\*+", "bullshit"),
    (r"jacka\*+", "jackass"),
    (r"goddam\*", "goddamn"),
    (r"godd\*mn", "goddamn"),
    (r"f\*+king", "fucking"),
    (r"f\*+ked", "fucked"),
    (r"fu\*+in", "fuckin"),
    (r"f\*+k", "fuck"),
    (r"f\*ck", "fuck"),
    (r"fuc\*", "fuck"),
    (r"fu\*+", "fuck"),
    (r"b\*+hes", "bitches"),
    (r"b\*+ch", "bitch"),
    (r"b\*+h", "bitch"),
    (r"bit\*+", "bitch"),
    (r"sh\*tty", "shitty"),
    (r"sh\*t", "shit"),
    (r"s\*+t", "shit"),
    (r"sh\*+", "shit"),
    (r"p\*+y", "pussy"),
    (r"pus\*+", "pussy"),
    (r"d\*+k", "dick"),
    (r"dic\*", "dick"),
    (r"c\*ck", "cock"),
    (r"coc\*ine", "cocaine"),
    (r"co\*aine", "cocaine"),
    (r"coc\*", "cock"),
    (r"ti\*+s", "tits"),
    (r"t\*ts", "tits"),
    (r"a\*\*hole", "asshole"),
    (r"ass\*+", "asshole"),
    (r"ba\*+ard", "bastard"),
    (r"a\*+", "ass"),
    (r"wh\*+e", "whore"),
    (r"whor\*", "whore"),
    (r"w\*\*d", "weed"),
    (r"wee\*", "weed"),
    (r"he\*oin", "heroin"),
    (r"d\*+n", "damn"),
    (r"d\*mn", "damn"),
    (r"dam\*", "damn"),
    (r"h\*ll", "hell"),
    (r"hel\*", "hell"),
    (r"s\*x", "sex"),
    (r"se\*", "sex"),
];

struct Rule {
    re: Regex,
    word: &'static str,
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    TABLE
        .iter()
        .map(|(stem, word)| {
            // `\b` never holds after a trailing `*` or `'`, so those stems
            // capture the following separator and put it back.
            let end = if stem.ends_with(|c: char| c.is_ascii_alphabetic()) { r"\b" } else { r"(\W|$)" };
            Rule {
                re: Regex::new(&format!(r"(?i)\b{stem}{end}")).unwrap(),
                word,
            }
        })
        .collect()
});

fn match_case(original: &str, word: &str) -> String {
    let mut letters = original.chars().filter(|c| c.is_alphabetic()).peekable();
    if letters.peek().is_some() && letters.all(char::is_uppercase) {
        return word.to_uppercase();
    }
    if original.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = word.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    word.to_string()
}

/// Restore every masked word in `text`, keeping the original's casing.
pub fn uncensor(text: &str) -> String {
    if !text.contains('*') {
        return text.to_string();
    }
    let mut out = text.to_string();
    for rule in RULES.iter() {
        if !out.contains('*') {
            break;
        }
        out = rule
            .re
            .replace_all(&out, |caps: &Captures| {
                let whole = &caps[0];
                let tail = caps.get(1).map_or("", |m| m.as_str());
                let masked = &whole[..whole.len() - tail.len()];
                format!("{}{tail}", match_case(masked, rule.word))
            })
            .into_owned();
    }
    out
}

/// Uncensor line text, translations and word text in place. Returns how
/// many lines changed.
pub fn uncensor_lines(lines: &mut [SyllableLine]) -> usize {
    let mut changed = 0;
    for line in lines.iter_mut() {
        let mut touched = false;
        let mut fix = |s: &mut String| {
            if s.contains('*') {
                let restored = uncensor(s);
                if restored != *s {
                    *s = restored;
                    touched = true;
                }
            }
        };
        fix(&mut line.text);
        if let Some(t) = line.translation.as_mut() {
            fix(t);
        }
        for w in &mut line.words {
            fix(&mut w.text);
        }
        if touched {
            changed += 1;
        }
    }
    if changed > 0 {
        tracing::debug!(lines = changed, "Restored masked words");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restores_common_masks() {
        assert_eq!(uncensor("What the f**k is this"), "What the fuck is this");
        assert_eq!(uncensor("that's bullsh*t"), "that's bullshit");
        assert_eq!(uncensor("d**n right"), "damn right");
        assert_eq!(uncensor("kiss my a**"), "kiss my ass");
        assert_eq!(uncensor("kiss my a**, now"), "kiss my ass, now");
    }

    #[test]
    fn keeps_the_original_casing() {
        assert_eq!(uncensor("F**K YOU"), "FUCK YOU");
        assert_eq!(uncensor("Sh*t happens"), "Shit happens");
        assert_eq!(uncensor("oh sh*t"), "oh shit");
    }

    #[test]
    fn compound_words_win_over_their_parts() {
        assert_eq!(uncensor("you motherf**kin' fool"), "you motherfuckin' fool");
        assert_eq!(uncensor("ass**"), "asshole");
    }

    #[test]
    fn unmasked_text_is_untouched() {
        assert_eq!(uncensor("a star * in the sky"), "a star * in the sky");
        assert_eq!(uncensor("晴天"), "晴天");
    }

    #[test]
    fn lines_are_restored_in_place() {
        let mut lines = vec![
            SyllableLine {
                start_ms: 0,
                end_ms: 1000,
                text: "Hell, d*mn".into(),
                words: Vec::new(),
                translation: Some("sh*t happens".into()),
                romaji: None,
                explicit: false,
            },
            SyllableLine {
                start_ms: 1000,
                end_ms: 2000,
                text: "clean".into(),
                words: Vec::new(),
                translation: None,
                romaji: None,
                explicit: false,
            },
        ];
        assert_eq!(uncensor_lines(&mut lines), 1);
        assert_eq!(lines[0].text, "Hell, damn");
        assert_eq!(lines[0].translation.as_deref(), Some("shit happens"));
    }
}
