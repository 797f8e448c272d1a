use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::CollabError;

/// One language rendering of a text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub language: String,
    pub translated_text: String,
    pub source_language: String,
    pub model_used: String,
    pub error: Option<String>,
}

pub trait Translator: Send + Sync {
    /// Translates `text` into each supported target language. Unsupported
    /// codes are skipped; blank input yields an empty map.
    fn translate(
        &self,
        text: &str,
        targets: &[String],
    ) -> Result<BTreeMap<String, Translation>, CollabError>;
}

/// Languages a model-backed translator could render. Without one they
/// fall back to English.
const INDIC_LANGUAGES: &[&str] = &["hi", "te", "kn", "ta", "ml", "mr", "ur", "bn", "pa", "gu"];

const SOURCE_LANGUAGE: &str = "en";

static PROTECT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bSection\s+\d+[A-Za-z]?(?:\s*\(\d+\))?",
        r"\bSec\.\s*\d+[A-Za-z]?\b",
        r"\bArticle\s+\d+[A-Za-z]?(?:\s*\(\d+\))?",
        r"\bOrder\s+\d+\s+Rule\s+\d+\b",
        r"\b(?:IPC|CrPC|CPC|FIR|PMLA|NDPS|POCSO|RERA|GST|RTI|FEMA|NI\s+Act)\b",
        r"\bCASE-\d{8,}-[A-Z0-9]+\b",
        r"\b(?:WP|CC|MC|BA|OS|CRP|SLP|CA)\s*(?:No\.?)?\s*\d+\s*(?:/|of)\s*\d{4}\b",
        r"\(\s*(?:19|20)\d{2}\s*\)\s+\d+\s+(?:SCC|SCR|AIR)\s+\d+",
        r"\b\d{1,2}[./-]\d{1,2}[./-](?:19|20)\d{2}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static SIMPLE_EN: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bnot maintainable\b", "may be rejected by the court"),
        (r"\bmaintainable\b", "acceptable by the court"),
        (r"\blocus standi\b", "legal right to file a case"),
        (r"\bdisposed of?\b", "case closed / finished"),
        (r"\bex.?parte\b", "without the other side present"),
        (r"\binter.?alia\b", "among other things"),
        (r"\binjunction\b", "court order to stop or allow something"),
        (r"\bstay order\b", "temporary pause on proceedings"),
        (r"\bquash(?:ed)?\b", "cancelled by the court"),
        (r"\bwrit\b", "formal legal request to court"),
        (r"\bpetitioner\b", "person who filed this case"),
        (r"\brespondent\b", "person defending against this case"),
        (r"\bplaintiff\b", "person who filed this case"),
        (r"\bdefendant\b", "person defending against this case"),
        (r"\bapplicant\b", "person who made this request"),
        (r"\badjournment\b", "postponed to a later date"),
        (r"\bprima facie\b", "based on first look"),
        (r"\bjurisdiction\b", "authority of the court"),
        (r"\blimitation\b", "time limit to file a case"),
        (r"\baffidavit\b", "written sworn statement"),
        (r"\bsubmission\b", "argument presented in court"),
        (r"\bcontention\b", "argument made in court"),
        (r"\bexhibit\b", "document shown as evidence"),
        (r"\bdeposition\b", "evidence given under oath"),
        (r"\bremand\b", "sent back to custody"),
        (r"\bcognizance\b", "formally taking up the case"),
        (r"\bbail\b", "temporary release from custody"),
        (r"\bheld\b", "decided"),
        (r"\bvide\b", "as per"),
        (r"\binter se\b", "between themselves"),
        (r"\bopined\b", "stated"),
        (r"\bprayed\b", "requested from court"),
    ]
    .iter()
    .map(|(p, r)| (Regex::new(&format!("(?i){}", p)).unwrap(), *r))
    .collect()
});

/// Replaces section numbers, act names, case numbers, citations and dates
/// with `__LAWn__` placeholders so rewriting cannot alter them.
fn protect(text: &str) -> (String, Vec<(String, String)>) {
    let mut out = text.to_string();
    let mut protected: Vec<(String, String)> = Vec::new();
    for re in PROTECT_PATTERNS.iter() {
        let terms: Vec<String> = re.find_iter(&out).map(|m| m.as_str().to_string()).collect();
        for term in terms {
            if protected.iter().any(|(_, t)| *t == term) {
                continue;
            }
            let token = format!("__LAW{}__", protected.len());
            out = out.replace(&term, &token);
            protected.push((token, term));
        }
    }
    (out, protected)
}

fn restore(text: &str, protected: &[(String, String)]) -> String {
    // Later tokens first so __LAW1__ never clobbers the prefix of __LAW10__.
    protected
        .iter()
        .rev()
        .fold(text.to_string(), |acc, (token, term)| acc.replace(token, term))
}

/// Rewrites legal jargon as plain English, leaving protected tokens intact.
pub fn simplify_english(text: &str) -> String {
    let (protected_text, protected) = protect(text);
    let simplified = SIMPLE_EN
        .iter()
        .fold(protected_text, |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        });
    restore(&simplified, &protected)
}

/// Rule-based translator.
///
/// `en` passes through, `simple_en` gets the jargon glossary and the Indic
/// languages fall back to the English text with an error note. The
/// translated text is never empty for non-empty input.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlossaryTranslator;

impl GlossaryTranslator {
    fn render(language: &str, text: &str) -> Option<Translation> {
        let (translated_text, model_used, error) = match language {
            "en" => (text.to_string(), "passthrough", None),
            "simple_en" => (simplify_english(text), "rule-based simplification", None),
            lang if INDIC_LANGUAGES.contains(&lang) => (
                text.to_string(),
                "english-fallback",
                Some(format!("no translation model available for '{}'", lang)),
            ),
            _ => return None,
        };
        Some(Translation {
            language: language.to_string(),
            translated_text,
            source_language: SOURCE_LANGUAGE.to_string(),
            model_used: model_used.to_string(),
            error,
        })
    }
}

impl Translator for GlossaryTranslator {
    fn translate(
        &self,
        text: &str,
        targets: &[String],
    ) -> Result<BTreeMap<String, Translation>, CollabError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut out = BTreeMap::new();
        for target in targets {
            let lang = target.trim().to_lowercase();
            match Self::render(&lang, text) {
                Some(translation) => {
                    out.insert(lang, translation);
                }
                None => log::debug!("Skipping unsupported translation language '{}'", lang),
            }
        }
        Ok(out)
    }
}
