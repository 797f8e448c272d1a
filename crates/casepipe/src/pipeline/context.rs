use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::collab::Collaborators;
use crate::db::{artifact_repo, document_repo, Database, DatabaseError};
use crate::document::{Document, DocumentPatch};
use crate::error::{best_effort, StageError};
use crate::mirror::RelationalMirror;
use crate::queue::Job;
use crate::text::normalize_text;

/// Tunables read by the stage functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub target_languages: Vec<String>,
    pub similar_cases_limit: usize,
    /// Earlier predictions consulted by the predictor.
    pub prediction_history_limit: u64,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            chunk_size: 180,
            chunk_overlap: 40,
            target_languages: vec!["hi".to_string(), "te".to_string()],
            similar_cases_limit: 5,
            prediction_history_limit: 1500,
        }
    }
}

/// Everything a stage function may touch.
pub struct StageContext {
    pub db: Database,
    pub mirror: Arc<dyn RelationalMirror>,
    pub collaborators: Collaborators,
    pub settings: StageSettings,
}

impl StageContext {
    pub fn new(
        db: Database,
        mirror: Arc<dyn RelationalMirror>,
        collaborators: Collaborators,
        settings: StageSettings,
    ) -> Self {
        Self {
            db,
            mirror,
            collaborators,
            settings,
        }
    }

    /// A context for running `job` whose pipeline database access only
    /// succeeds while the job is still `processing` under the lease it was
    /// claimed with. A job without a lease gets a context that cannot
    /// touch the database at all.
    pub fn for_job(&self, job: &Job) -> StageContext {
        let token = job
            .lease
            .as_ref()
            .map(|lease| lease.token.as_str())
            .unwrap_or_default();
        Self {
            db: self.db.fenced(&job.job_id, token),
            mirror: Arc::clone(&self.mirror),
            collaborators: self.collaborators.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Fails once the lease this context is fenced on has been revoked.
    /// Checked before writes that go outside the pipeline database.
    pub fn ensure_lease(&self) -> Result<(), StageError> {
        self.db.with_conn(|_| Ok(()))?;
        Ok(())
    }

    /// The cleaned text, re-derived from the raw text when the cleaning
    /// stage's output is missing.
    pub fn clean_text(&self, document: &Document) -> String {
        match document.judgment_text.clean_text.as_deref() {
            Some(clean) if !clean.trim().is_empty() => clean.to_string(),
            _ => normalize_text(&document.judgment_text.raw_text),
        }
    }

    /// The document's mirror case id, looked up by case number when the
    /// document does not carry one yet.
    pub fn mirror_case_id(&self, document: &Document) -> Option<i64> {
        document.case_id_mirror.or_else(|| {
            best_effort(
                "mirror case lookup",
                self.mirror.find_case_id(&document.case_number),
            )
            .flatten()
        })
    }

    /// Applies a patch to the document being processed.
    pub fn update_document(
        &self,
        document: &Document,
        patch: &DocumentPatch,
    ) -> Result<(), StageError> {
        if !document_repo::update(&self.db, &document.document_id, patch, Utc::now())? {
            return Err(StageError::DocumentMissing {
                document_id: document.document_id.clone(),
            });
        }
        Ok(())
    }

    /// Appends an audit entry for the stage the job is running.
    pub fn record_output(&self, job: &Job, output: &Value) {
        best_effort(
            "stage output",
            artifact_repo::append_stage_output(
                &self.db,
                &job.document_id,
                &job.case_identifier,
                job.stage,
                output,
                Utc::now(),
            ),
        );
    }

    pub fn log_system(&self, action: &str, details: &str) {
        best_effort(
            "system log",
            self.mirror.log_system("pipeline", action, details),
        );
    }
}

/// Serializes a value for storage in a document patch or artifact.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, StageError> {
    serde_json::to_value(value).map_err(|e| StageError::Database(DatabaseError::from(e)))
}
