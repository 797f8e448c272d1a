//! The case document persisted in the document store.
//!
//! Each pipeline stage reads the fields it needs and writes back only its
//! own section through a [`DocumentPatch`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::Stage;

/// Mirror of the pipeline position, stored on the document for readers
/// that never look at the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Uploaded,
    Extracted,
    Cleaned,
    Summarized,
    Translated,
    Chunked,
    Embedded,
    Predicted,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Uploaded => "uploaded",
            ProcessingStatus::Extracted => "extracted",
            ProcessingStatus::Cleaned => "cleaned",
            ProcessingStatus::Summarized => "summarized",
            ProcessingStatus::Translated => "translated",
            ProcessingStatus::Chunked => "chunked",
            ProcessingStatus::Embedded => "embedded",
            ProcessingStatus::Predicted => "predicted",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl From<Stage> for ProcessingStatus {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Uploaded => ProcessingStatus::Uploaded,
            Stage::Extracted => ProcessingStatus::Extracted,
            Stage::Cleaned => ProcessingStatus::Cleaned,
            Stage::Summarized => ProcessingStatus::Summarized,
            Stage::Translated => ProcessingStatus::Translated,
            Stage::Chunked => ProcessingStatus::Chunked,
            Stage::Embedded => ProcessingStatus::Embedded,
            Stage::Predicted => ProcessingStatus::Predicted,
            Stage::Completed => ProcessingStatus::Completed,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseDates {
    pub filing_date: Option<String>,
    pub registration_date: Option<String>,
    pub decision_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parties {
    pub petitioner: Option<String>,
    pub respondent: Option<String>,
    pub advocates: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseMetadata {
    pub court_name: Option<String>,
    pub court_level: Option<String>,
    pub bench: Option<String>,
    pub case_type: Option<String>,
    pub disposition: Option<String>,
    pub citation: Option<String>,
    pub dates: CaseDates,
    pub parties: Parties,
    pub judges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub para_no: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgmentText {
    pub raw_text: String,
    pub clean_text: Option<String>,
    pub language: Option<String>,
    pub token_count: Option<u64>,
    pub paragraphs: Vec<Paragraph>,
}

/// Per-stage completion flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NlpFlags {
    pub text_cleaned: bool,
    pub entities_extracted: bool,
    pub summarized: bool,
    pub translated: bool,
    pub chunks_created: bool,
    pub embedded: bool,
    pub prediction_done: bool,
}

impl NlpFlags {
    pub const KEYS: [&'static str; 7] = [
        "text_cleaned",
        "entities_extracted",
        "summarized",
        "translated",
        "chunks_created",
        "embedded",
        "prediction_done",
    ];

    pub fn all_set(&self) -> bool {
        self.text_cleaned
            && self.entities_extracted
            && self.summarized
            && self.translated
            && self.chunks_created
            && self.embedded
            && self.prediction_done
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingInfo {
    pub chunk_count: u64,
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
    pub last_chunked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingInfo {
    pub embedding_model: Option<String>,
    pub vector_dimension: Option<usize>,
    pub stored_in_vector_db: bool,
    pub embedded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionInfo {
    pub predicted_outcome: Option<String>,
    pub win_probability: Option<f64>,
    pub confidence_score: Option<f64>,
    pub model_version: Option<String>,
    pub predicted_at: Option<DateTime<Utc>>,
}

/// One entry of the append-only failure log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub at: DateTime<Utc>,
    pub stage: Stage,
    pub attempt: u32,
    pub message: String,
}

/// A judgment document and everything the pipeline derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub case_number: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub case_id_mirror: Option<i64>,
    #[serde(default)]
    pub metadata: CaseMetadata,
    #[serde(default)]
    pub judgment_text: JudgmentText,
    #[serde(default)]
    pub nlp_flags: NlpFlags,
    #[serde(default)]
    pub chunking: ChunkingInfo,
    #[serde(default)]
    pub embedding: EmbeddingInfo,
    #[serde(default)]
    pub prediction: PredictionInfo,
    pub processing_status: ProcessingStatus,
    #[serde(default)]
    pub error_logs: Vec<ErrorLogEntry>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Document {
    /// Creates a freshly uploaded document.
    pub fn new(
        document_id: impl Into<String>,
        case_number: impl Into<String>,
        source_type: impl Into<String>,
        raw_text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            case_number: case_number.into(),
            source_type: source_type.into(),
            title: None,
            case_id_mirror: None,
            metadata: CaseMetadata::default(),
            judgment_text: JudgmentText {
                raw_text: raw_text.into(),
                ..Default::default()
            },
            nlp_flags: NlpFlags::default(),
            chunking: ChunkingInfo::default(),
            embedding: EmbeddingInfo::default(),
            prediction: PredictionInfo::default(),
            processing_status: ProcessingStatus::Uploaded,
            error_logs: Vec::new(),
            created_at: now,
            last_updated_at: now,
        }
    }
}

/// A set of nested field assignments applied to a stored document in one
/// write. Paths use dots, e.g. `judgment_text.clean_text`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPatch {
    sets: Vec<(String, Value)>,
}

impl DocumentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sets.push((path.into(), value.into()));
        self
    }

    /// Sets `nlp_flags.<flag>` to true.
    pub fn flag(self, flag: &str) -> Self {
        self.set(format!("nlp_flags.{}", flag), true)
    }

    pub fn status(self, status: ProcessingStatus) -> Self {
        self.set("processing_status", status.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn assignments(&self) -> &[(String, Value)] {
        &self.sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_round_trips_through_json() {
        let doc = Document::new("doc-1", "WP 12/2024", "upload", "Some text.", Utc::now());
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_missing_sections_default() {
        let json = r#"{
            "document_id": "doc-1",
            "case_number": "C-1",
            "processing_status": "uploaded",
            "created_at": "2026-01-01T00:00:00Z",
            "last_updated_at": "2026-01-01T00:00:00Z"
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert!(!doc.nlp_flags.text_cleaned);
        assert!(doc.error_logs.is_empty());
        assert_eq!(doc.judgment_text.raw_text, "");
    }

    #[test]
    fn test_processing_status_follows_stage() {
        assert_eq!(
            ProcessingStatus::from(Stage::Completed),
            ProcessingStatus::Completed
        );
        assert_eq!(ProcessingStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn test_patch_builder() {
        let patch = DocumentPatch::new()
            .flag("summarized")
            .status(ProcessingStatus::Summarized);
        assert_eq!(patch.assignments().len(), 2);
        assert_eq!(patch.assignments()[0].0, "nlp_flags.summarized");
        assert_eq!(patch.assignments()[1].1, Value::from("summarized"));
    }
}
