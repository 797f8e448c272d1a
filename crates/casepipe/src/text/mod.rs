//! Plain-text helpers shared by the pipeline stages.

use std::sync::LazyLock;

use regex::Regex;

use crate::document::Paragraph;

static RE_HORIZONTAL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Share of characters in doubled pairs above which a document is treated
/// as a doubled-glyph OCR scan.
const DOUBLED_PAIR_RATIO: f64 = 0.15;

/// Characters inspected by [`detect_language_code`].
const LANGUAGE_SAMPLE_CHARS: usize = 4000;

const TITLE_MAX_CHARS: usize = 150;
const UNTITLED: &str = "Untitled Case";

/// Fraction of characters that belong to non-overlapping doubled pairs.
fn doubled_pair_ratio(chars: &[char]) -> f64 {
    let mut pairs = 0usize;
    let mut i = 0;
    while i + 1 < chars.len() {
        if chars[i] == chars[i + 1] && chars[i] != '\n' {
            pairs += 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    (pairs * 2) as f64 / chars.len().max(1) as f64
}

/// Collapses runs of at least `min_run` identical characters (newlines
/// excepted) to a single character.
fn collapse_runs(chars: &[char], min_run: usize) -> String {
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut j = i + 1;
        while j < chars.len() && chars[j] == c {
            j += 1;
        }
        let run = j - i;
        if c != '\n' && run >= min_run {
            out.push(c);
        } else {
            out.extend(std::iter::repeat(c).take(run));
        }
        i = j;
    }
    out
}

/// Repairs the repeated-glyph artefact of scanned PDFs, e.g.
/// `"MMss.. AAnnjjaallii"` becomes `"Ms. Anjali"`.
///
/// Heavily doubled documents get every run collapsed; otherwise only runs
/// of three or more are collapsed so ordinary doubled letters survive.
pub fn dedupe_ocr_chars(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if doubled_pair_ratio(&chars) > DOUBLED_PAIR_RATIO {
        collapse_runs(&chars, 2)
    } else {
        collapse_runs(&chars, 3)
    }
}

/// Normalizes OCR output: NULs removed, glyph doubling repaired, spaces
/// and tabs collapsed, at most one blank line between paragraphs.
pub fn normalize_text(text: &str) -> String {
    let text = text.replace('\0', " ");
    let text = dedupe_ocr_chars(&text);
    let text = RE_HORIZONTAL_WS.replace_all(&text, " ");
    let text = RE_BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Splits text into sentences ending in `.`, `!` or `?` followed by
/// whitespace. Empty sentences are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let ends = matches!(c, '.' | '!' | '?')
            && chars.peek().map(|n| n.is_whitespace()).unwrap_or(false);
        if ends {
            while chars.peek().map(|n| n.is_whitespace()).unwrap_or(false) {
                chars.next();
            }
            push_trimmed(&mut sentences, &current);
            current.clear();
        }
    }
    push_trimmed(&mut sentences, &current);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, s: &str) {
    let trimmed = s.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Splits normalized text into numbered paragraphs on blank lines, falling
/// back to sentences when the text has no paragraph breaks at all.
pub fn split_paragraphs(text: &str) -> Vec<Paragraph> {
    let normalized = normalize_text(text);
    let mut parts: Vec<String> = RE_PARAGRAPH_BREAK
        .split(&normalized)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        parts = split_sentences(&normalized);
    }
    parts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Paragraph {
            para_no: i as u32 + 1,
            text,
        })
        .collect()
}

/// Guesses the script of a text: `te`, `hi`, `ur` or `en`.
pub fn detect_language_code(text: &str) -> &'static str {
    let sample: Vec<char> = text.chars().take(LANGUAGE_SAMPLE_CHARS).collect();
    let has = |lo: char, hi: char| sample.iter().any(|c| (lo..=hi).contains(c));
    if has('\u{0C00}', '\u{0C7F}') {
        "te"
    } else if has('\u{0900}', '\u{097F}') {
        "hi"
    } else if has('\u{0600}', '\u{06FF}') {
        "ur"
    } else {
        "en"
    }
}

/// Text before the first period, capped at 150 characters.
pub fn first_line_title(text: &str) -> String {
    let head = text.split('.').next().unwrap_or("");
    let title: String = head.chars().take(TITLE_MAX_CHARS).collect();
    let title = title.trim();
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title.to_string()
    }
}

/// The first `limit` sentences of a text.
pub fn extract_facts(text: &str, limit: usize) -> Vec<String> {
    split_sentences(text).into_iter().take(limit).collect()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Splits text into windows of `size` words, each starting `size - overlap`
/// words after the previous one. The last window ends at the final word.
pub fn chunk_words(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || size == 0 {
        return Vec::new();
    }

    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end >= words.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Truncates text to its first `max_words` words.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    words[..max_words].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_collapses_doubled_scan() {
        assert_eq!(dedupe_ocr_chars("MMss.. AAnnjjaallii"), "Ms. Anjali");
        assert_eq!(dedupe_ocr_chars("CCCCRRRRMMMM"), "CRM");
    }

    #[test]
    fn test_dedupe_keeps_normal_double_letters() {
        assert_eq!(
            dedupe_ocr_chars("The appeal was finally heard and the bench ruled on it today!!!"),
            "The appeal was finally heard and the bench ruled on it today!"
        );
        let text = "The committee met on Monday morning to review the report of the board";
        assert_eq!(dedupe_ocr_chars(text), text);
    }

    #[test]
    fn test_normalize_whitespace() {
        let text = "Line\tone   here\n\n\n\nLine two\0end  ";
        assert_eq!(normalize_text(text), "Line one here\n\nLine two end");
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("First one. Second?  Third!\nFourth");
        assert_eq!(s, vec!["First one.", "Second?", "Third!", "Fourth"]);
        assert_eq!(split_sentences("Rs.500 paid."), vec!["Rs.500 paid."]);
    }

    #[test]
    fn test_split_paragraphs() {
        let paras = split_paragraphs("Para one.\n\nPara two.\n \nPara three.");
        assert_eq!(paras.len(), 3);
        assert_eq!(paras[2].para_no, 3);
        assert_eq!(paras[1].text, "Para two.");
    }

    #[test]
    fn test_split_paragraphs_single_block() {
        let paras = split_paragraphs("Only one block. With two sentences.");
        assert_eq!(paras.len(), 1);
        assert!(split_paragraphs("   ").is_empty());
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language_code("plain english"), "en");
        assert_eq!(detect_language_code("न्यायालय"), "hi");
        assert_eq!(detect_language_code("న్యాయస్థానం and हिंदी"), "te");
        assert_eq!(detect_language_code("عدالت"), "ur");
    }

    #[test]
    fn test_first_line_title() {
        assert_eq!(first_line_title("State vs Ravi. Judgment follows."), "State vs Ravi");
        assert_eq!(first_line_title(""), "Untitled Case");
        assert_eq!(first_line_title(". starts with dot"), "Untitled Case");
        assert_eq!(first_line_title(&"x".repeat(400)).len(), 150);
    }

    #[test]
    fn test_extract_facts_limits_sentences() {
        let text = "One. Two. Three. Four. Five. Six. Seven.";
        assert_eq!(extract_facts(text, 5).len(), 5);
    }

    #[test]
    fn test_chunk_words_windows() {
        let text: Vec<String> = (0..400).map(|i| format!("w{}", i)).collect();
        let chunks = chunk_words(&text.join(" "), 180, 40);
        // starts at 0, 140, 280; the third reaches the end
        assert_eq!(chunks.len(), 3);
        assert!(chunks[1].starts_with("w140 "));
        assert!(chunks[2].ends_with("w399"));
        assert_eq!(word_count(&chunks[0]), 180);
    }

    #[test]
    fn test_chunk_words_short_and_empty() {
        assert_eq!(chunk_words("a b c", 180, 40), vec!["a b c"]);
        assert!(chunk_words("   ", 180, 40).is_empty());
    }

    #[test]
    fn test_truncate_words() {
        assert_eq!(truncate_words("a b c d", 2), "a b");
        assert_eq!(truncate_words("a b", 5), "a b");
    }
}
