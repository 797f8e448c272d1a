//! Dashboard queries - aggregate counts and per-case pipeline status.

use rusqlite::params;
use serde::Serialize;

use super::{document_repo, job_repo, Database, DatabaseError};
use crate::document::{NlpFlags, ProcessingStatus};
use crate::queue::{Job, JobStatus};

/// Number of jobs in each status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub retry: u64,
    pub failed: u64,
    pub completed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.retry + self.failed + self.completed
    }

    fn slot(&mut self, status: JobStatus) -> &mut u64 {
        match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Retry => &mut self.retry,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Completed => &mut self.completed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_cases: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending_or_processing: u64,
}

/// Share of documents that reached each derived artifact, in percent
/// rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageMetrics {
    pub total_cases: u64,
    pub summary_coverage_pct: f64,
    pub translation_coverage_pct: f64,
    pub rag_coverage_pct: f64,
    pub prediction_coverage_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub case_identifier: String,
    pub stage: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRow {
    pub case_identifier: String,
    pub title: Option<String>,
    pub processing_status: Option<String>,
    pub created_at: String,
}

/// Queue and document state of one case.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub case_identifier: String,
    pub job: Job,
    pub processing_status: Option<ProcessingStatus>,
    pub nlp_flags: Option<NlpFlags>,
    pub case_id_mirror: Option<i64>,
}

pub fn status_counts(db: &Database) -> Result<StatusCounts, DatabaseError> {
    let rows: Vec<(String, u64)> = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        match status.parse::<JobStatus>() {
            Ok(status) => *counts.slot(status) += count,
            Err(e) => log::warn!("Ignoring job count: {}", e),
        }
    }
    Ok(counts)
}

pub fn overview(db: &Database) -> Result<Overview, DatabaseError> {
    let counts = status_counts(db)?;
    Ok(Overview {
        total_cases: document_repo::count(db)?,
        completed: counts.completed,
        failed: counts.failed,
        pending_or_processing: counts.pending + counts.retry + counts.processing,
    })
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((part as f64 / total as f64) * 10_000.0).round() / 100.0
}

pub fn coverage(db: &Database) -> Result<CoverageMetrics, DatabaseError> {
    let (summaries, translations, predictions, chunked, embedded) = db.with_conn(|conn| {
        let artifacts = |kind: &str| -> Result<u64, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*) FROM case_artifacts WHERE kind = ?1",
                params![kind],
                |r| r.get(0),
            )
        };
        let summaries = artifacts("summary")?;
        let translations = artifacts("translation")?;
        let predictions = artifacts("prediction")?;
        let chunked: u64 = conn.query_row(
            "SELECT COUNT(DISTINCT document_id) FROM case_chunks",
            [],
            |r| r.get(0),
        )?;
        let embedded: u64 = conn.query_row(
            "SELECT COUNT(DISTINCT document_id) FROM embeddings_metadata",
            [],
            |r| r.get(0),
        )?;
        Ok((summaries, translations, predictions, chunked, embedded))
    })?;

    let total = document_repo::count(db)?;
    Ok(CoverageMetrics {
        total_cases: total,
        summary_coverage_pct: percentage(summaries, total),
        translation_coverage_pct: percentage(translations, total),
        rag_coverage_pct: percentage(chunked.min(embedded), total),
        prediction_coverage_pct: percentage(predictions, total),
    })
}

/// Latest stage runs across all cases. `limit` is clamped to 1..=100.
pub fn recent_activity(db: &Database, limit: u64) -> Result<Vec<ActivityEvent>, DatabaseError> {
    let limit = limit.clamp(1, 100) as i64;
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT case_identifier, stage, created_at FROM stage_outputs
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |r| {
                Ok(ActivityEvent {
                    case_identifier: r.get(0)?,
                    stage: r.get(1)?,
                    created_at: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Most recently created cases. `limit` is clamped to 1..=200.
pub fn list_cases(db: &Database, limit: u64) -> Result<Vec<CaseRow>, DatabaseError> {
    let limit = limit.clamp(1, 200) as i64;
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT case_identifier,
                    json_extract(body, '$.title'),
                    json_extract(body, '$.processing_status'),
                    created_at
             FROM documents ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |r| {
                Ok(CaseRow {
                    case_identifier: r.get(0)?,
                    title: r.get(1)?,
                    processing_status: r.get(2)?,
                    created_at: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Looks up the job and document state for a case identifier.
pub fn pipeline_status(
    db: &Database,
    case_identifier: &str,
) -> Result<Option<PipelineStatus>, DatabaseError> {
    let (jobs, _) = job_repo::query(
        db,
        &job_repo::JobFilter {
            case_identifier: Some(case_identifier.to_string()),
            limit: Some(1),
            ..Default::default()
        },
    )?;
    let Some(job) = jobs.into_iter().next() else {
        return Ok(None);
    };

    let document = document_repo::find(db, &job.document_id)?;
    Ok(Some(PipelineStatus {
        case_identifier: case_identifier.to_string(),
        processing_status: document.as_ref().map(|d| d.processing_status),
        nlp_flags: document.as_ref().map(|d| d.nlp_flags),
        case_id_mirror: document.and_then(|d| d.case_id_mirror),
        job,
    }))
}
