//! Entry point for new judgments.

use chrono::{DateTime, Utc};

use crate::db::document_repo;
use crate::document::{CaseMetadata, Document};
use crate::error::IngestError;
use crate::pipeline::Stage;
use crate::queue::{Job, JobQueue};

/// A judgment whose text has already been extracted.
#[derive(Debug, Clone, Default)]
pub struct NewJudgment {
    /// Generated when absent.
    pub case_number: Option<String>,
    pub source_type: String,
    pub raw_text: String,
    pub title: Option<String>,
    pub metadata: CaseMetadata,
}

impl NewJudgment {
    pub fn new(source_type: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            raw_text: raw_text.into(),
            ..Default::default()
        }
    }

    pub fn with_case_number(mut self, case_number: impl Into<String>) -> Self {
        self.case_number = Some(case_number.into());
        self
    }
}

/// Placeholder case number for uploads that carry none, e.g.
/// `CASE-20240611-1F2E3D4C`. The mirror skips these.
pub fn placeholder_case_number(now: DateTime<Utc>) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect();
    format!("CASE-{}-{}", now.format("%Y%m%d"), suffix.to_uppercase())
}

/// Stores the judgment as a new document and enqueues its job at
/// `extracted`, returning both.
pub fn ingest_document(
    queue: &JobQueue,
    judgment: NewJudgment,
) -> Result<(Document, Job), IngestError> {
    if judgment.raw_text.trim().is_empty() {
        return Err(IngestError::EmptyText);
    }

    let now = Utc::now();
    let case_number = match judgment.case_number {
        Some(number) if !number.trim().is_empty() => number.trim().to_string(),
        _ => placeholder_case_number(now),
    };

    let mut document = Document::new(
        uuid::Uuid::new_v4().to_string(),
        case_number,
        judgment.source_type,
        judgment.raw_text,
        now,
    );
    document.title = judgment.title;
    document.metadata = judgment.metadata;

    document_repo::insert(queue.database(), &document)?;
    let job = queue.enqueue(&document.document_id, &document.case_number, Stage::Extracted)?;

    log::info!(
        "Ingested document {} for case {}",
        document.document_id,
        document.case_number
    );
    Ok((document, job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::queue::{JobStatus, QueuePolicy};

    fn queue() -> JobQueue {
        JobQueue::new(Database::open_in_memory().unwrap(), QueuePolicy::default())
    }

    #[test]
    fn test_ingest_creates_document_and_job() {
        let queue = queue();
        let judgment = NewJudgment::new("upload", "The petition is allowed.")
            .with_case_number("WP 101/2023");

        let (document, job) = ingest_document(&queue, judgment).unwrap();
        assert_eq!(document.case_number, "WP 101/2023");
        assert_eq!(job.document_id, document.document_id);
        assert_eq!(job.case_identifier, "WP 101/2023");
        assert_eq!(job.stage, Stage::Extracted);
        assert_eq!(job.status, JobStatus::Pending);

        let stored = document_repo::find(queue.database(), &document.document_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.judgment_text.raw_text, "The petition is allowed.");
    }

    #[test]
    fn test_ingest_generates_case_number() {
        let queue = queue();
        let (document, _) =
            ingest_document(&queue, NewJudgment::new("scan", "Appeal dismissed.")).unwrap();

        assert!(document.case_number.starts_with("CASE-"));
        let parts: Vec<&str> = document.case_number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[2], parts[2].to_uppercase());
    }

    #[test]
    fn test_ingest_rejects_blank_text() {
        let queue = queue();
        let result = ingest_document(&queue, NewJudgment::new("upload", "  \n "));
        assert!(matches!(result, Err(IngestError::EmptyText)));
        assert_eq!(queue.counts().unwrap().total(), 0);
    }
}
