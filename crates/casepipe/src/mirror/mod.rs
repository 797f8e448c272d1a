//! Relational mirror - structured case rows kept beside the document store
//! for reporting and joins.
//!
//! Stages write to the mirror through [`best_effort`](crate::error::best_effort):
//! a mirror outage never fails or delays a job.

mod sqlite;

pub use sqlite::SqliteMirror;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::document::Document;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Mirror database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Case row as written to the mirror's `cases` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorCase {
    pub case_number: String,
    pub title: String,
    pub court_name: Option<String>,
    pub court_level: Option<String>,
    pub bench: Option<String>,
    pub case_type: Option<String>,
    pub filing_date: Option<String>,
    pub registration_date: Option<String>,
    pub decision_date: Option<String>,
    pub petitioner: Option<String>,
    pub respondent: Option<String>,
    pub judge_names: Option<String>,
    pub advocates: Option<String>,
    pub disposition: Option<String>,
    pub citation: Option<String>,
}

impl MirrorCase {
    /// Builds the mirror row for a document. Placeholder values such as an
    /// empty string or `unknown` are dropped so they never overwrite real
    /// data already in the mirror.
    pub fn from_document(doc: &Document, title: &str) -> Self {
        let meta = &doc.metadata;
        let petitioner = clean_value(meta.parties.petitioner.as_deref());
        let respondent = clean_value(meta.parties.respondent.as_deref());
        let joined = |items: &[String]| {
            let kept: Vec<&str> = items
                .iter()
                .filter_map(|item| clean_value(Some(item.as_str())))
                .collect();
            (!kept.is_empty()).then(|| kept.join(", "))
        };

        Self {
            case_number: doc.case_number.clone(),
            title: canonical_title(petitioner, respondent, title, &doc.case_number),
            court_name: clean_value(meta.court_name.as_deref()).map(str::to_string),
            court_level: clean_value(meta.court_level.as_deref()).map(str::to_string),
            bench: clean_value(meta.bench.as_deref()).map(str::to_string),
            case_type: clean_value(meta.case_type.as_deref()).map(str::to_string),
            filing_date: clean_value(meta.dates.filing_date.as_deref()).map(str::to_string),
            registration_date: clean_value(meta.dates.registration_date.as_deref())
                .map(str::to_string),
            decision_date: clean_value(meta.dates.decision_date.as_deref()).map(str::to_string),
            judge_names: joined(&meta.judges),
            advocates: joined(&meta.parties.advocates),
            disposition: clean_value(meta.disposition.as_deref()).map(str::to_string),
            citation: clean_value(meta.citation.as_deref()).map(str::to_string),
            petitioner: petitioner.map(str::to_string),
            respondent: respondent.map(str::to_string),
        }
    }
}

/// Prediction row as written to the mirror's `case_predictions` table.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorPrediction {
    pub outcome: String,
    pub win_probability: f64,
    pub confidence: f64,
    pub key_factors: String,
    pub model_version: String,
}

/// Structured store receiving best-effort copies of stage results.
pub trait RelationalMirror: Send + Sync {
    /// Inserts or updates the case row and returns its id. Returns `None`
    /// when the case number is a generated placeholder and was skipped.
    fn upsert_case(&self, case: &MirrorCase) -> Result<Option<i64>, MirrorError>;

    fn find_case_id(&self, case_number: &str) -> Result<Option<i64>, MirrorError>;

    fn replace_facts(&self, case_id: i64, facts: &[String]) -> Result<(), MirrorError>;

    fn replace_summary(&self, case_id: i64, summary: &str, model: &str)
        -> Result<(), MirrorError>;

    fn replace_translation(
        &self,
        case_id: i64,
        language_code: &str,
        text: &str,
        model: &str,
    ) -> Result<(), MirrorError>;

    fn replace_prediction(
        &self,
        case_id: i64,
        prediction: &MirrorPrediction,
    ) -> Result<(), MirrorError>;

    /// Replaces the similar-case links of `case_id`. Case numbers unknown to
    /// the mirror are skipped. Returns the number of links written.
    fn replace_similar_cases(
        &self,
        case_id: i64,
        similar_case_numbers: &[String],
    ) -> Result<usize, MirrorError>;

    fn log_system(&self, module: &str, action: &str, details: &str) -> Result<(), MirrorError>;
}

/// Mirror used when no mirror database is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMirror;

impl RelationalMirror for NoopMirror {
    fn upsert_case(&self, _case: &MirrorCase) -> Result<Option<i64>, MirrorError> {
        Ok(None)
    }

    fn find_case_id(&self, _case_number: &str) -> Result<Option<i64>, MirrorError> {
        Ok(None)
    }

    fn replace_facts(&self, _case_id: i64, _facts: &[String]) -> Result<(), MirrorError> {
        Ok(())
    }

    fn replace_summary(
        &self,
        _case_id: i64,
        _summary: &str,
        _model: &str,
    ) -> Result<(), MirrorError> {
        Ok(())
    }

    fn replace_translation(
        &self,
        _case_id: i64,
        _language_code: &str,
        _text: &str,
        _model: &str,
    ) -> Result<(), MirrorError> {
        Ok(())
    }

    fn replace_prediction(
        &self,
        _case_id: i64,
        _prediction: &MirrorPrediction,
    ) -> Result<(), MirrorError> {
        Ok(())
    }

    fn replace_similar_cases(
        &self,
        _case_id: i64,
        _similar_case_numbers: &[String],
    ) -> Result<usize, MirrorError> {
        Ok(0)
    }

    fn log_system(&self, _module: &str, _action: &str, _details: &str) -> Result<(), MirrorError> {
        Ok(())
    }
}

/// Trims a metadata value, mapping empty strings and `unknown` to `None`.
pub fn clean_value(value: Option<&str>) -> Option<&str> {
    let trimmed = value?.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
        None
    } else {
        Some(trimmed)
    }
}

/// Title built from the parties when known, else the extracted title,
/// else the case number.
pub fn canonical_title(
    petitioner: Option<&str>,
    respondent: Option<&str>,
    title: &str,
    case_number: &str,
) -> String {
    match (petitioner, respondent) {
        (Some(p), Some(r)) => format!("{} vs {}", p, r),
        (Some(p), None) => p.to_string(),
        (None, Some(r)) => r.to_string(),
        (None, None) => clean_value(Some(title)).unwrap_or(case_number).to_string(),
    }
}

/// Case numbers generated at ingestion when none was supplied.
pub fn is_placeholder_case_number(case_number: &str) -> bool {
    case_number.trim().is_empty() || case_number.starts_with("CASE-")
}
