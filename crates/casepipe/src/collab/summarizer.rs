//! Section-aware extractive summarizer.
//!
//! Header noise is dropped, paragraphs are scored against fact, argument
//! and decision signal phrases, and the best sentence of the top
//! paragraphs is rewritten with a plain-English glossary.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::CollabError;
use crate::text::{normalize_text, split_sentences};

/// Texts shorter than this are reported as too short to summarize.
const MIN_SUMMARY_CHARS: usize = 80;
const MIN_PARAGRAPH_CHARS: usize = 40;
const DECISION_TAIL_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub label: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub short_summary: String,
    pub detailed_summary: String,
    pub key_points: Vec<KeyPoint>,
}

impl StructuredSummary {
    /// Key points rendered as a bulleted list.
    pub fn bullet_points(&self) -> String {
        self.key_points
            .iter()
            .map(|p| format!("- {}: {}", p.label, p.explanation))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub trait Summarizer: Send + Sync {
    fn summarize(&self, text: &str) -> Result<StructuredSummary, CollabError>;

    /// A short jargon-free summary suitable for translation.
    fn basic_summary(&self, text: &str) -> Result<String, CollabError>;

    fn model_name(&self) -> &str;
}

static NOISE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^in the (court|high court|supreme court|district court|sessions|tribunal)",
        r"^before (the hon|hon'ble|magistrate|judge)",
        r"^(present|coram)\s*:",
        r"^case\s*(no|number|id)[.:# ]",
        r"^\bcc\s*no\b",
        r"^dated[.:# ]",
        r"^date[.:# ]",
        r"^(appearance|appearances)\s*:",
        r"^for (the )?(petitioner|respondent|accused|state|appellant|complainant|plaintiff|defendant)\s*:",
        r"^(advocate|adv|counsel|sr\.?\s*counsel|ld\.?\s*counsel)",
        r"^(mr|mrs|ms|dr|smt|shri)\.\s+[a-z].*?adv",
        r"^\s*page\s*\d+",
        r"^\d+\s*$",
        r"^(civil appellate|criminal appellate|original jurisdiction)",
        r"^(writ petition|criminal appeal|civil appeal|mat|fmat|slp)\s*(no|number)?\s*\d",
        r"^(heard on|judgment on|order dated|decided on)\s*:",
        r"^(judgment|order)\s+dated",
        r"^(j\s*u\s*d\s*g\s*m\s*e\s*n\s*t|o\s*r\s*d\s*e\s*r)\s*$",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
    .collect()
});

static RE_PARAGRAPH_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").unwrap());

static JARGON: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bnot maintainable\b", "may be rejected by the court"),
        (r"\bmaintainable\b", "acceptable by the court"),
        (r"\blocus standi\b", "legal right to file this case"),
        (r"\bdisposed of\b", "case has been closed"),
        (r"\bdisposed\b", "the case is finished"),
        (r"\bex-parte\b", "decided without the other side present"),
        (r"\binter-alia\b", "among other things"),
        (r"\binjunction\b", "court order to stop or allow something"),
        (r"\bstay order\b", "temporary pause on a decision"),
        (r"\bquash(?:ed)?\b", "cancel / set aside"),
        (r"\bwrit\b", "formal legal request to the court"),
        (r"\bpetitioner\b", "the person who filed this case"),
        (r"\brespondent\b", "the other party defending the case"),
        (r"\bplaintiff\b", "the person who filed this case"),
        (r"\bdefendant\b", "the person defending the case"),
        (r"\bapplicant\b", "the person who made this request"),
        (r"\badjournment\b", "postponing to a later date"),
        (r"\bsubmission\b", "argument"),
        (r"\bcontention\b", "argument made in court"),
        (r"\bprima facie\b", "based on first look"),
        (r"\bjurisdiction\b", "legal authority of the court"),
        (r"\blimitation\b", "time limit for filing"),
        (r"\binstant case\b", "this case"),
        (r"\bheld\b", "the court decided"),
        (r"\baffidavit\b", "sworn written statement"),
        (r"\bencumbrance\b", "claim or burden on property"),
        (r"\bcounsel\b", "lawyer"),
        (r"\badvocate\b", "lawyer"),
        (r"\bgranted\b", "approved"),
        (r"\bdismissed\b", "rejected"),
        (r"\bappeal\b", "challenge to a lower court decision"),
        (r"\bdeposed\b", "gave testimony"),
        (r"\bexamined\b", "questioned in court"),
        (r"\bremanded\b", "sent back"),
        (r"\bin custody\b", "under arrest"),
        (r"\bdetained\b", "held by police"),
        (r"\bfurnish(?:ing)? (a )?surety\b", "provide a guarantor"),
        (r"\bfurnish(?:ing)? (a )?bail bond\b", "submit a bail document"),
        (r"\bpecuniary\b", "financial"),
        (r"\bherein\b", "in this case"),
        (r"\btherein\b", "in that"),
        (r"\bwherein\b", "where"),
        (r"\bviz\.?", "that is"),
    ]
    .iter()
    .map(|(p, r)| (Regex::new(&format!("(?i){}", p)).unwrap(), *r))
    .collect()
});

const FACT_SIGNALS: &[&str] = &[
    "allegation",
    "alleged",
    "complaint",
    "complained",
    "prosecution case",
    "fir",
    "first information report",
    "accused",
    "accused person",
    "accused is alleged",
    "incident",
    "occurrence",
    "offence",
    "offense",
    "it is stated",
    "it is alleged",
    "the case of",
    "prosecution states",
    "the deceased",
    "victim",
    "injured",
    "administered",
    "poisoned",
    "arrested",
    "detention",
    "in custody",
    "taken into custody",
    "confessed",
    "confession",
    "admitted",
    "statement of",
    "witness",
    "evidence",
    "material on record",
];

const DECISION_SIGNALS: &[&str] = &[
    "petition allowed",
    "application allowed",
    "appeal allowed",
    "bail granted",
    "bail is granted",
    "granted bail",
    "released on bail",
    "accused released",
    "set at liberty",
    "petition dismissed",
    "application rejected",
    "appeal dismissed",
    "dismissed",
    "quashed",
    "set aside",
    "the court is satisfied",
    "no merit",
    "no case",
    "in the result",
    "in the circumstances",
    "accordingly",
    "for the foregoing reasons",
    "in view of",
    "therefore",
    "thus",
    "hence",
    "we hold",
    "it is held",
    "disposed of",
    "case is closed",
];

const ARGUMENT_SIGNALS: &[&str] = &[
    "learned counsel",
    "sr. counsel",
    "senior counsel",
    "it is submitted",
    "it is contended",
    "argued that",
    "submitted that",
    "contended that",
    "urged that",
    "on behalf of",
    "for the accused",
    "for the petitioner",
    "defense argued",
    "defence argued",
    "the other side",
    "objected",
    "opposed",
    "no opposition",
];

fn is_noise_line(line: &str) -> bool {
    let stripped = line.trim();
    let len = stripped.chars().count();
    if len < 3 {
        return true;
    }
    let has_upper = stripped.chars().any(|c| c.is_uppercase());
    let has_lower = stripped.chars().any(|c| c.is_lowercase());
    if len < 60 && has_upper && !has_lower {
        return true;
    }
    NOISE_PATTERNS.iter().any(|re| re.is_match(stripped))
}

fn remove_header_noise(text: &str) -> String {
    // blank lines are kept so paragraph breaks survive
    text.lines()
        .filter(|line| line.trim().is_empty() || !is_noise_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn simplify(text: &str) -> String {
    JARGON.iter().fold(text.to_string(), |acc, (re, replacement)| {
        re.replace_all(&acc, *replacement).into_owned()
    })
}

fn score(paragraph: &str, signals: &[&str]) -> usize {
    let lower = paragraph.to_lowercase();
    signals.iter().filter(|s| lower.contains(*s)).count()
}

fn paragraphs(text: &str) -> Vec<String> {
    RE_PARAGRAPH_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|p| p.chars().count() >= MIN_PARAGRAPH_CHARS)
        .map(str::to_string)
        .collect()
}

/// Paragraphs with at least one signal, highest score first, original
/// order kept among equal scores.
fn top_paragraphs(paras: Vec<String>, signals: &[&str], limit: usize) -> Vec<String> {
    let mut scored: Vec<(usize, String)> = paras
        .into_iter()
        .map(|p| (score(&p, signals), p))
        .filter(|(s, _)| *s >= 1)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(limit).map(|(_, p)| p).collect()
}

fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    match text.char_indices().nth(count - n) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// The most informative sentence of a paragraph.
fn best_sentence(paragraph: &str) -> String {
    let good: Vec<String> = split_sentences(paragraph)
        .into_iter()
        .filter(|s| s.chars().count() > 30)
        .collect();
    if good.is_empty() {
        return paragraph.trim().chars().take(300).collect();
    }

    let weight = |s: &str| {
        (score(s, FACT_SIGNALS) + score(s, DECISION_SIGNALS)) as f64
            + s.chars().count() as f64 / 500.0
    };
    let mut best = &good[0];
    let mut best_weight = weight(best);
    for candidate in &good[1..] {
        let w = weight(candidate);
        if w > best_weight {
            best = candidate;
            best_weight = w;
        }
    }
    best.clone()
}

fn simplified_best(paragraph: &str) -> String {
    simplify(&best_sentence(paragraph))
}

struct Sections {
    body: String,
    facts: Vec<String>,
    arguments: Vec<String>,
    decisions: Vec<String>,
}

impl Sections {
    fn detect(text: &str) -> Self {
        let body = remove_header_noise(text);
        let facts = top_paragraphs(paragraphs(&body), FACT_SIGNALS, 4);
        let arguments = top_paragraphs(paragraphs(&body), ARGUMENT_SIGNALS, 2);
        let mut decision_pool = paragraphs(&body);
        decision_pool.extend(paragraphs(tail_chars(&body, DECISION_TAIL_CHARS)));
        let decisions = top_paragraphs(decision_pool, DECISION_SIGNALS, 3);
        Self {
            body,
            facts,
            arguments,
            decisions,
        }
    }
}

/// Deterministic rule-based summarizer.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicSummarizer;

impl HeuristicSummarizer {
    fn quick_summary(sections: &Sections) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(first) = sections.facts.first() {
            parts.push(simplified_best(first));
        }
        if let Some(second) = sections.facts.get(1) {
            let s = simplified_best(second);
            if !s.is_empty() && parts.first() != Some(&s) {
                parts.push(s);
            }
        }
        if let Some(arg) = sections.arguments.first() {
            parts.push(simplified_best(arg));
        }
        for decision in sections.decisions.iter().take(2) {
            let s = simplified_best(decision);
            if !parts.contains(&s) {
                parts.push(s);
            }
        }
        if parts.is_empty() {
            if let Some(first) = paragraphs(&sections.body).first() {
                parts.push(simplified_best(first));
            }
        }
        if parts.is_empty() {
            return "Summary could not be generated from the document content.".to_string();
        }
        parts.truncate(5);
        parts.join(" ")
    }

    fn key_points(sections: &Sections) -> Vec<KeyPoint> {
        let pick = |paras: &[String], fallback: &str| {
            paras
                .first()
                .map(|p| simplified_best(p))
                .unwrap_or_else(|| fallback.to_string())
        };
        let issue_source = if sections.facts.len() > 1 {
            &sections.facts[1..]
        } else {
            &sections.facts[..]
        };

        [
            (
                "Who filed the case",
                pick(
                    &sections.facts,
                    "The case was filed based on a police complaint or court petition.",
                ),
            ),
            (
                "Main issue",
                pick(
                    issue_source,
                    "The main issue involves allegations that need to be examined by the court.",
                ),
            ),
            (
                "What the other side says",
                pick(
                    &sections.arguments,
                    "The defense has argued that the accusations are not supported by sufficient evidence.",
                ),
            ),
            (
                "What the court examined",
                pick(
                    &sections.facts,
                    "The court reviewed the available evidence and circumstances of the case.",
                ),
            ),
            (
                "Current status",
                pick(
                    &sections.decisions,
                    "The case is currently pending before the court.",
                ),
            ),
        ]
        .into_iter()
        .map(|(label, explanation)| KeyPoint {
            label: label.to_string(),
            explanation,
        })
        .collect()
    }
}

fn joined_best(paras: &[String], n: usize) -> String {
    let joined = paras
        .iter()
        .take(n)
        .map(|p| simplified_best(p))
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        "Not identified in the document.".to_string()
    } else {
        joined
    }
}

impl Summarizer for HeuristicSummarizer {
    fn summarize(&self, text: &str) -> Result<StructuredSummary, CollabError> {
        let text = normalize_text(text);
        if text.chars().count() < MIN_SUMMARY_CHARS {
            return Ok(StructuredSummary {
                short_summary: "The document does not have enough text to summarize.".into(),
                detailed_summary: "Not enough content available.".into(),
                key_points: vec![KeyPoint {
                    label: "Note".into(),
                    explanation: "The uploaded document is too short or could not be read."
                        .into(),
                }],
            });
        }

        let sections = Sections::detect(&text);
        Ok(StructuredSummary {
            short_summary: Self::quick_summary(&sections),
            detailed_summary: format!(
                "Facts: {}\nArguments: {}\nOutcome: {}",
                joined_best(&sections.facts, 2),
                joined_best(&sections.arguments, 2),
                joined_best(&sections.decisions, 2)
            ),
            key_points: Self::key_points(&sections),
        })
    }

    fn basic_summary(&self, text: &str) -> Result<String, CollabError> {
        let text = normalize_text(text);
        if text.chars().count() < MIN_SUMMARY_CHARS {
            return Ok("The document does not have enough text to summarize.".into());
        }

        let sections = Sections::detect(&text);
        let mut sentences: Vec<String> = sections
            .facts
            .iter()
            .take(2)
            .chain(sections.arguments.iter().take(1))
            .chain(sections.decisions.iter().take(2))
            .map(|p| simplified_best(p))
            .collect();
        if sentences.is_empty() {
            sentences = paragraphs(&sections.body)
                .iter()
                .take(3)
                .map(|p| simplified_best(p))
                .collect();
        }
        if sentences.is_empty() {
            return Ok("Summary could not be generated.".into());
        }
        sentences.truncate(6);
        Ok(sentences.join(" "))
    }

    fn model_name(&self) -> &str {
        "heuristic-extractive"
    }
}
