//! SQLite-backed relational mirror.

use std::path::Path;

use rusqlite::{params, OptionalExtension};

use super::{
    is_placeholder_case_number, MirrorCase, MirrorError, MirrorPrediction, RelationalMirror,
};
use crate::db::{Database, Schema};

/// Similarity recorded for every vector-search neighbour.
const SIMILARITY_SCORE: f64 = 0.7;

/// Longest `system_logs.details` value stored, in characters.
const MAX_LOG_DETAILS: usize = 5000;

#[derive(Clone)]
pub struct SqliteMirror {
    db: Database,
}

impl SqliteMirror {
    pub fn open(path: &Path) -> Result<Self, MirrorError> {
        Ok(Self {
            db: Database::open_with_schema(path, Schema::Mirror)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, MirrorError> {
        Ok(Self {
            db: Database::open_in_memory_with_schema(Schema::Mirror)?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

impl RelationalMirror for SqliteMirror {
    fn upsert_case(&self, case: &MirrorCase) -> Result<Option<i64>, MirrorError> {
        if is_placeholder_case_number(&case.case_number) {
            self.log_system(
                "pipeline",
                "sql_case_upsert_skipped",
                &format!("No real case_number: {}", case.case_number),
            )?;
            return Ok(None);
        }

        let case_id = self.db.with_conn(|conn| {
            let id: i64 = conn.query_row(
                "INSERT INTO cases (
                    case_number, title, court_name, court_level, bench,
                    case_type, filing_date, registration_date, decision_date,
                    petitioner, respondent, judge_names, advocates,
                    disposition, citation, source
                 )
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 'upload')
                 ON CONFLICT(case_number) DO UPDATE SET
                    title             = excluded.title,
                    court_name        = COALESCE(excluded.court_name, court_name),
                    court_level       = COALESCE(excluded.court_level, court_level),
                    bench             = COALESCE(excluded.bench, bench),
                    case_type         = COALESCE(excluded.case_type, case_type),
                    filing_date       = COALESCE(excluded.filing_date, filing_date),
                    registration_date = COALESCE(excluded.registration_date, registration_date),
                    decision_date     = COALESCE(excluded.decision_date, decision_date),
                    petitioner        = COALESCE(excluded.petitioner, petitioner),
                    respondent        = COALESCE(excluded.respondent, respondent),
                    judge_names       = COALESCE(excluded.judge_names, judge_names),
                    advocates         = COALESCE(excluded.advocates, advocates),
                    disposition       = COALESCE(excluded.disposition, disposition),
                    citation          = COALESCE(excluded.citation, citation)
                 RETURNING case_id",
                params![
                    case.case_number,
                    case.title,
                    case.court_name,
                    case.court_level,
                    case.bench,
                    case.case_type,
                    case.filing_date,
                    case.registration_date,
                    case.decision_date,
                    case.petitioner,
                    case.respondent,
                    case.judge_names,
                    case.advocates,
                    case.disposition,
                    case.citation,
                ],
                |r| r.get(0),
            )?;
            Ok(id)
        })?;
        Ok(Some(case_id))
    }

    fn find_case_id(&self, case_number: &str) -> Result<Option<i64>, MirrorError> {
        let id = self.db.with_conn(|conn| {
            let id = conn
                .query_row(
                    "SELECT case_id FROM cases WHERE case_number = ?1",
                    params![case_number],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(id)
        })?;
        Ok(id)
    }

    fn replace_facts(&self, case_id: i64, facts: &[String]) -> Result<(), MirrorError> {
        self.db.with_tx(|tx| {
            tx.execute("DELETE FROM case_facts WHERE case_id = ?1", params![case_id])?;
            let mut stmt = tx.prepare(
                "INSERT INTO case_facts (case_id, fact_type, fact_text) VALUES (?1, ?2, ?3)",
            )?;
            for (idx, fact) in facts.iter().enumerate() {
                stmt.execute(params![case_id, format!("fact_{}", idx + 1), fact])?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn replace_summary(&self, case_id: i64, summary: &str, model: &str) -> Result<(), MirrorError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO case_summaries (case_id, summary_type, summary_text, model_used)
                 VALUES (?1, 'judgment', ?2, ?3)
                 ON CONFLICT(case_id) DO UPDATE SET
                   summary_type = excluded.summary_type,
                   summary_text = excluded.summary_text,
                   model_used = excluded.model_used",
                params![case_id, summary, model],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn replace_translation(
        &self,
        case_id: i64,
        language_code: &str,
        text: &str,
        model: &str,
    ) -> Result<(), MirrorError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO case_translations (case_id, language_code, translated_summary, model_used)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(case_id) DO UPDATE SET
                   language_code = excluded.language_code,
                   translated_summary = excluded.translated_summary,
                   model_used = excluded.model_used",
                params![case_id, language_code, text, model],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn replace_prediction(
        &self,
        case_id: i64,
        prediction: &MirrorPrediction,
    ) -> Result<(), MirrorError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO case_predictions (case_id, predicted_outcome, win_probability,
                 confidence_score, key_factors, model_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(case_id) DO UPDATE SET
                   predicted_outcome = excluded.predicted_outcome,
                   win_probability = excluded.win_probability,
                   confidence_score = excluded.confidence_score,
                   key_factors = excluded.key_factors,
                   model_version = excluded.model_version",
                params![
                    case_id,
                    prediction.outcome,
                    prediction.win_probability,
                    prediction.confidence,
                    prediction.key_factors,
                    prediction.model_version,
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn replace_similar_cases(
        &self,
        case_id: i64,
        similar_case_numbers: &[String],
    ) -> Result<usize, MirrorError> {
        let written = self.db.with_tx(|tx| {
            tx.execute("DELETE FROM similar_cases WHERE case_id = ?1", params![case_id])?;
            let mut written = 0;
            for case_number in similar_case_numbers {
                let target: Option<i64> = tx
                    .query_row(
                        "SELECT case_id FROM cases WHERE case_number = ?1",
                        params![case_number],
                        |r| r.get(0),
                    )
                    .optional()?;
                let Some(target) = target.filter(|&id| id != case_id) else {
                    continue;
                };
                written += tx.execute(
                    "INSERT OR IGNORE INTO similar_cases (case_id, similar_case_id, similarity_score)
                     VALUES (?1, ?2, ?3)",
                    params![case_id, target, SIMILARITY_SCORE],
                )?;
            }
            Ok(written)
        })?;
        Ok(written)
    }

    fn log_system(&self, module: &str, action: &str, details: &str) -> Result<(), MirrorError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO system_logs (module, action, details) VALUES (?1, ?2, ?3)",
                params![module, action, truncate_chars(details, MAX_LOG_DETAILS)],
            )?;
            Ok(())
        })?;
        Ok(())
    }
}
