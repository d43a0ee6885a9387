//! Turn a winning candidate into a [`LyricsDocument`].

use crate::lyrics::cleaner::strip_credits;
use crate::lyrics::types::{DocumentType, LyricsDocument, RawLine, RawWord, SyllableLine, UpstreamCandidate, Word};
use crate::lyrics::uncensor::uncensor_lines;

/// How long the final line lasts when nothing else bounds it.
pub const LAST_LINE_MS: u64 = 5000;

/// Drop empty lines and order the rest by start time, keeping source order
/// among equal starts.
fn sorted_lines(mut raw: Vec<RawLine>) -> Vec<RawLine> {
    raw.retain(|l| !l.text.trim().is_empty());
    raw.sort_by_key(|l| l.start_ms);
    raw
}

/// Sort, fold lines sharing a start time into translations, and drop empties.
fn merge_lines(raw: Vec<RawLine>) -> Vec<RawLine> {
    let raw = sorted_lines(raw);
    let mut merged: Vec<RawLine> = Vec::with_capacity(raw.len());
    for line in raw {
        match merged.last_mut() {
            Some(prev) if prev.start_ms == line.start_ms => {
                if prev.translation.is_none() {
                    prev.translation = Some(line.text.trim().to_string());
                }
            }
            _ => merged.push(line),
        }
    }
    merged
}

fn clamp_words(raw: &RawLine, start: u64, end: u64) -> Vec<Word> {
    let mut words: Vec<&RawWord> = raw.words.iter().filter(|w| !w.text.is_empty()).collect();
    words.sort_by_key(|w| w.start_ms);

    let mut out: Vec<Word> = Vec::with_capacity(words.len());
    let mut cursor = start;
    for w in words {
        let ws = w.start_ms.clamp(cursor, end);
        let we = w.end_ms.clamp(ws, end);
        out.push(Word {
            text: w.text.clone(),
            start_ms: ws,
            end_ms: we,
        });
        cursor = we;
    }
    out
}

/// Fix up timing so lines are ordered, non-overlapping and non-empty.
pub fn build_lines(raw: Vec<RawLine>, duration_ms: Option<u64>) -> Vec<SyllableLine> {
    let merged = merge_lines(raw);
    let starts: Vec<u64> = merged.iter().map(|l| l.start_ms).collect();

    merged
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let start = raw.start_ms;
            let next = starts.get(i + 1).copied();
            let fallback = match next {
                Some(n) => n,
                None => duration_ms.filter(|d| *d > start).unwrap_or(start.saturating_add(LAST_LINE_MS)),
            };
            let word_end = raw.words.iter().map(|w| w.end_ms).max();
            let mut end = raw.end_ms.or(word_end).filter(|e| *e > start).unwrap_or(fallback);
            if let Some(n) = next {
                end = end.min(n);
            }
            let words = clamp_words(&raw, start, end);
            SyllableLine {
                start_ms: start,
                end_ms: end,
                text: raw.text.trim().to_string(),
                words,
                translation: raw.translation.filter(|t| !t.trim().is_empty()),
                romaji: None,
                explicit: false,
            }
        })
        .collect()
}

/// Build the document for the selected candidate. Credit lines are removed
/// before same-start lines are folded into translations, so a credit never
/// ends up as a translation.
pub fn normalize(candidate: &UpstreamCandidate, match_score: u8) -> LyricsDocument {
    let raw = candidate.decoded.as_ref().map(|d| d.lines.clone()).unwrap_or_default();
    let (raw, credits) = strip_credits(sorted_lines(raw));
    let mut lines = build_lines(raw, candidate.duration_ms);
    uncensor_lines(&mut lines);
    let doc_type = if lines.iter().any(|l| !l.words.is_empty()) {
        DocumentType::Syllable
    } else {
        DocumentType::Line
    };
    LyricsDocument {
        doc_type,
        source: candidate.source,
        match_score: match_score.min(100),
        lines,
        credits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::parse::parse_lrc;
    use crate::lyrics::types::{CreditRole, DecodedLyrics, SourceId};

    fn candidate(lines: Vec<RawLine>) -> UpstreamCandidate {
        UpstreamCandidate {
            source: SourceId::Qq,
            track_id: "1".into(),
            raw_payload: Vec::new(),
            decoded: Some(DecodedLyrics { lines }),
            duration_ms: None,
            title_raw: String::new(),
            artist_raw: String::new(),
            album_raw: String::new(),
            is_instrumental: false,
        }
    }

    fn word(start: u64, end: u64, text: &str) -> RawWord {
        RawWord {
            start_ms: start,
            end_ms: end,
            text: text.to_string(),
        }
    }

    #[test]
    fn end_times_follow_the_next_line() {
        let lines = build_lines(
            vec![RawLine::new(5000, "two"), RawLine::new(1000, "one"), RawLine::new(9000, "three")],
            None,
        );
        let spans: Vec<(u64, u64)> = lines.iter().map(|l| (l.start_ms, l.end_ms)).collect();
        assert_eq!(spans, vec![(1000, 5000), (5000, 9000), (9000, 14000)]);

        let lines = build_lines(vec![RawLine::new(1000, "one")], Some(200_000));
        assert_eq!(lines[0].end_ms, 200_000);
    }

    #[test]
    fn overlapping_spans_are_clamped() {
        let mut first = RawLine::new(1000, "one");
        first.end_ms = Some(7000);
        first.words = vec![word(1000, 3000, "o"), word(2500, 8000, "ne")];
        let lines = build_lines(vec![first, RawLine::new(5000, "two")], None);
        assert_eq!(lines[0].end_ms, 5000);
        assert_eq!(lines[0].words[1].start_ms, 3000);
        assert_eq!(lines[0].words[1].end_ms, 5000);
        for line in &lines {
            assert!(line.start_ms < line.end_ms);
            for pair in line.words.windows(2) {
                assert!(pair[0].end_ms <= pair[1].start_ms);
            }
        }
    }

    #[test]
    fn same_start_lines_become_translations() {
        let lines = build_lines(
            vec![
                RawLine::new(1000, "晴天"),
                RawLine::new(1000, "Sunny day"),
                RawLine::new(1000, "extra"),
                RawLine::new(4000, "  "),
                RawLine::new(6000, "next"),
            ],
            None,
        );
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].translation.as_deref(), Some("Sunny day"));
        assert_eq!(lines[0].end_ms, 6000);
    }

    #[test]
    fn document_type_and_credits() {
        let mut sung = RawLine::new(2000, "Hello");
        sung.words = vec![word(2000, 2500, "Hel"), word(2500, 3000, "lo")];
        let doc = normalize(&candidate(vec![RawLine::new(0, "作词 : 方文山"), sung]), 120);
        assert_eq!(doc.doc_type, DocumentType::Syllable);
        assert_eq!(doc.match_score, 100);
        assert_eq!(doc.lines.len(), 1);
        assert_eq!(doc.credits.get(&CreditRole::Lyricist).map(String::as_str), Some("方文山"));
    }

    #[test]
    fn stacked_zero_time_credits_are_all_kept() {
        let lines = parse_lrc("[00:00.00]作词：方文山\n[00:00.00]作曲：周杰伦\n[00:05.00]故事的小黄花");
        let doc = normalize(&candidate(lines), 90);
        assert_eq!(doc.lines.len(), 1);
        assert_eq!(doc.lines[0].text, "故事的小黄花");
        assert!(doc.lines[0].translation.is_none());
        assert_eq!(doc.credits.get(&CreditRole::Lyricist).map(String::as_str), Some("方文山"));
        assert_eq!(doc.credits.get(&CreditRole::Composer).map(String::as_str), Some("周杰伦"));
    }

    #[test]
    fn credit_sharing_a_timestamp_is_not_a_translation() {
        let lines = parse_lrc("[00:01.00]第一句歌词\n[00:01.00]作曲：周杰伦");
        let doc = normalize(&candidate(lines), 90);
        assert_eq!(doc.lines.len(), 1);
        assert_eq!(doc.lines[0].text, "第一句歌词");
        assert!(doc.lines[0].translation.is_none());
        assert_eq!(doc.credits.len(), 1);
        assert_eq!(doc.credits.get(&CreditRole::Composer).map(String::as_str), Some("周杰伦"));
    }

    #[test]
    fn masked_words_are_restored() {
        let doc = normalize(&candidate(vec![RawLine::new(1000, "Oh sh*t")]), 90);
        assert_eq!(doc.lines[0].text, "Oh shit");
    }
}
