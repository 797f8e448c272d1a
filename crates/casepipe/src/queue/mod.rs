//! Durable job queue with lease-fenced transitions.
//!
//! `JobQueue` wraps the job repository with the retry policy and the
//! document-side failure bookkeeping. Every method is safe to call from
//! multiple schedulers sharing the same database file.

mod job;

pub use job::{Job, JobStatus, UnknownStatus, WorkerLease};

use std::time::Duration;

use chrono::Utc;

use crate::db::job_repo::{self, JobFilter};
use crate::db::stats_repo::{self, StatusCounts};
use crate::db::{document_repo, Database};
use crate::document::ErrorLogEntry;
use crate::error::{best_effort, QueueError};
use crate::pipeline::Stage;

/// Retry behaviour applied by [`JobQueue::fail`] and [`JobQueue::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Failed attempts after which a job is marked `failed`.
    pub max_retries: u32,
    /// Reset `attempts` whenever a job advances to its next stage.
    pub reset_attempts_on_advance: bool,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            reset_attempts_on_advance: false,
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    policy: QueuePolicy,
}

impl JobQueue {
    pub fn new(db: Database, policy: QueuePolicy) -> Self {
        Self { db, policy }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Creates or resets the job for a document so it runs from `stage`.
    ///
    /// Failed and completed jobs become claimable again. A job that is
    /// currently being processed is left alone and `JobInFlight` returned.
    pub fn enqueue(
        &self,
        document_id: &str,
        case_identifier: &str,
        stage: Stage,
    ) -> Result<Job, QueueError> {
        let new_id = uuid::Uuid::new_v4().to_string();
        match job_repo::upsert(
            &self.db,
            &new_id,
            document_id,
            case_identifier,
            stage,
            Utc::now(),
        )? {
            Some(job) => {
                log::debug!(
                    "Enqueued job {} for document {} at stage {}",
                    job.job_id,
                    document_id,
                    stage
                );
                Ok(job)
            }
            None => {
                let job_id = job_repo::find_by_document(&self.db, document_id)?
                    .map(|job| job.job_id)
                    .unwrap_or_default();
                Err(QueueError::JobInFlight { job_id })
            }
        }
    }

    /// Claims the oldest `pending` or `retry` job for `owner`.
    pub fn claim_next(&self, owner: &str) -> Result<Option<Job>, QueueError> {
        let token = uuid::Uuid::new_v4().to_string();
        let job = job_repo::claim_next(&self.db, owner, &token, Utc::now())?;
        if let Some(ref job) = job {
            log::debug!(
                "{} claimed job {} at stage {} (attempts {})",
                owner,
                job.job_id,
                job.stage,
                job.attempts
            );
        }
        Ok(job)
    }

    /// Releases a claimed job at `next`, or marks it completed when `next`
    /// is the terminal stage.
    pub fn finish(&self, job: &Job, next: Stage) -> Result<Job, QueueError> {
        let token = lease_token(job)?;
        let now = Utc::now();
        let updated = if next.is_terminal() {
            job_repo::complete(&self.db, &job.job_id, token, now)?
        } else {
            job_repo::advance(
                &self.db,
                &job.job_id,
                token,
                next,
                self.policy.reset_attempts_on_advance,
                now,
            )?
        };
        updated.ok_or_else(|| QueueError::LeaseLost {
            job_id: job.job_id.clone(),
        })
    }

    /// Records a failed attempt on a claimed job.
    ///
    /// The job moves to `retry`, or to `failed` once the retry budget is
    /// spent. The document is then marked failed with an error-log entry;
    /// that write is best effort and never changes the result.
    pub fn fail(&self, job: &Job, error: &str) -> Result<Job, QueueError> {
        let token = lease_token(job)?;
        let now = Utc::now();
        let updated = job_repo::record_failure(
            &self.db,
            &job.job_id,
            token,
            error,
            self.policy.max_retries,
            now,
        )?
        .ok_or_else(|| QueueError::LeaseLost {
            job_id: job.job_id.clone(),
        })?;

        if updated.status == JobStatus::Failed {
            log::warn!(
                "Job {} failed permanently at stage {} after {} attempts: {}",
                updated.job_id,
                updated.stage,
                updated.attempts,
                error
            );
        } else {
            log::info!(
                "Job {} will retry stage {} (attempt {} of {}): {}",
                updated.job_id,
                updated.stage,
                updated.attempts,
                self.policy.max_retries,
                error
            );
        }

        let entry = ErrorLogEntry {
            at: now,
            stage: updated.stage,
            attempt: updated.attempts,
            message: error.to_string(),
        };
        best_effort(
            "record document failure",
            document_repo::record_failure(&self.db, &updated.document_id, &entry),
        );

        Ok(updated)
    }

    /// Fails every `processing` job whose lease is older than `lease_timeout`.
    ///
    /// Such jobs belong to workers that crashed or hung. They go through the
    /// normal retry path, which also revokes the lease.
    pub fn recover_orphans(&self, lease_timeout: Duration) -> Result<Vec<Job>, QueueError> {
        let Some(cutoff) = chrono::Duration::from_std(lease_timeout)
            .ok()
            .and_then(|timeout| Utc::now().checked_sub_signed(timeout))
        else {
            return Ok(Vec::new());
        };

        let mut recovered = Vec::new();
        for job in job_repo::find_expired_leases(&self.db, cutoff)? {
            let owner = job
                .lease
                .as_ref()
                .map(|lease| lease.owner.as_str())
                .unwrap_or("unknown");
            let message = format!(
                "lease held by {} expired after {}s",
                owner,
                lease_timeout.as_secs()
            );
            match self.fail(&job, &message) {
                Ok(updated) => recovered.push(updated),
                // The owner finished between the scan and the fail.
                Err(QueueError::LeaseLost { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if !recovered.is_empty() {
            log::warn!("Recovered {} orphaned job(s)", recovered.len());
        }
        Ok(recovered)
    }

    pub fn find(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(job_repo::find_by_id(&self.db, job_id)?)
    }

    pub fn find_by_document(&self, document_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(job_repo::find_by_document(&self.db, document_id)?)
    }

    /// Lists jobs matching `filter`, returning (rows, total_count).
    pub fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, u64), QueueError> {
        Ok(job_repo::query(&self.db, filter)?)
    }

    pub fn counts(&self) -> Result<StatusCounts, QueueError> {
        Ok(stats_repo::status_counts(&self.db)?)
    }
}

fn lease_token(job: &Job) -> Result<&str, QueueError> {
    job.lease
        .as_ref()
        .map(|lease| lease.token.as_str())
        .ok_or_else(|| QueueError::LeaseLost {
            job_id: job.job_id.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, ProcessingStatus};

    fn test_queue(max_retries: u32) -> JobQueue {
        let db = Database::open_in_memory().expect("Failed to create test database");
        JobQueue::new(
            db,
            QueuePolicy {
                max_retries,
                ..Default::default()
            },
        )
    }

    fn add_document(queue: &JobQueue, id: &str) {
        let doc = Document::new(id, format!("C-{}", id), "upload", "text", Utc::now());
        document_repo::insert(queue.database(), &doc).unwrap();
    }

    #[test]
    fn test_enqueue_new_job() {
        let queue = test_queue(3);
        let job = queue.enqueue("doc-1", "C-1", Stage::Extracted).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(queue.find(&job.job_id).unwrap().unwrap(), job);
    }

    #[test]
    fn test_enqueue_in_flight_is_refused() {
        let queue = test_queue(3);
        let job = queue.enqueue("doc-1", "C-1", Stage::Extracted).unwrap();
        queue.claim_next("w").unwrap().unwrap();

        let err = queue.enqueue("doc-1", "C-1", Stage::Extracted).unwrap_err();
        match err {
            QueueError::JobInFlight { job_id } => assert_eq!(job_id, job.job_id),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_finish_advances_and_completes() {
        let queue = test_queue(3);
        queue.enqueue("doc-1", "C-1", Stage::Predicted).unwrap();

        let claimed = queue.claim_next("w").unwrap().unwrap();
        let done = queue.finish(&claimed, Stage::Completed).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.stage, Stage::Predicted);
        assert!(queue.claim_next("w").unwrap().is_none());
    }

    #[test]
    fn test_finish_with_stale_lease_is_rejected() {
        let queue = test_queue(3);
        queue.enqueue("doc-1", "C-1", Stage::Extracted).unwrap();
        let mut claimed = queue.claim_next("w").unwrap().unwrap();
        if let Some(lease) = claimed.lease.as_mut() {
            lease.token = "stale".into();
        }

        let err = queue.finish(&claimed, Stage::Cleaned).unwrap_err();
        assert!(matches!(err, QueueError::LeaseLost { .. }));
    }

    #[test]
    fn test_fail_exhausts_retries_and_marks_document() {
        let queue = test_queue(3);
        add_document(&queue, "doc-1");
        queue.enqueue("doc-1", "C-doc-1", Stage::Extracted).unwrap();

        let mut last = None;
        for _ in 0..3 {
            let claimed = queue.claim_next("w").unwrap().unwrap();
            last = Some(queue.fail(&claimed, "stage exploded").unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.status, JobStatus::Failed);
        assert_eq!(last.attempts, 3);
        assert_eq!(last.last_error.as_deref(), Some("stage exploded"));
        assert!(queue.claim_next("w").unwrap().is_none());

        let doc = document_repo::find(queue.database(), "doc-1")
            .unwrap()
            .unwrap();
        assert_eq!(doc.processing_status, ProcessingStatus::Failed);
        assert_eq!(doc.error_logs.len(), 3);
    }

    #[test]
    fn test_failed_job_resumes_after_enqueue() {
        let queue = test_queue(1);
        queue.enqueue("doc-1", "C-1", Stage::Cleaned).unwrap();
        let claimed = queue.claim_next("w").unwrap().unwrap();
        queue.fail(&claimed, "boom").unwrap();
        assert!(queue.claim_next("w").unwrap().is_none());

        let reset = queue.enqueue("doc-1", "C-1", Stage::Cleaned).unwrap();
        assert_eq!(reset.status, JobStatus::Pending);
        assert_eq!(reset.attempts, 1);
        assert!(reset.last_error.is_none());
        assert!(queue.claim_next("w").unwrap().is_some());
    }

    #[test]
    fn test_fail_without_document_still_transitions() {
        let queue = test_queue(3);
        queue.enqueue("ghost", "C-1", Stage::Extracted).unwrap();
        let claimed = queue.claim_next("w").unwrap().unwrap();
        let failed = queue.fail(&claimed, "document missing").unwrap();
        assert_eq!(failed.status, JobStatus::Retry);
    }

    #[test]
    fn test_reset_attempts_on_advance() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(
            db,
            QueuePolicy {
                max_retries: 3,
                reset_attempts_on_advance: true,
            },
        );
        queue.enqueue("doc-1", "C-1", Stage::Extracted).unwrap();
        let claimed = queue.claim_next("w").unwrap().unwrap();
        queue.fail(&claimed, "transient").unwrap();

        let claimed = queue.claim_next("w").unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);
        let advanced = queue.finish(&claimed, Stage::Cleaned).unwrap();
        assert_eq!(advanced.attempts, 0);
    }

    #[test]
    fn test_recover_orphans_revokes_expired_lease() {
        let queue = test_queue(3);
        queue.enqueue("doc-1", "C-1", Stage::Extracted).unwrap();
        let claimed = queue.claim_next("crashed-worker").unwrap().unwrap();

        assert!(queue
            .recover_orphans(Duration::from_secs(3600))
            .unwrap()
            .is_empty());

        std::thread::sleep(Duration::from_millis(20));
        let recovered = queue.recover_orphans(Duration::from_millis(1)).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].status, JobStatus::Retry);
        assert!(recovered[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("crashed-worker"));

        let err = queue.finish(&claimed, Stage::Cleaned).unwrap_err();
        assert!(matches!(err, QueueError::LeaseLost { .. }));
    }

    #[test]
    fn test_counts() {
        let queue = test_queue(3);
        queue.enqueue("doc-1", "C-1", Stage::Extracted).unwrap();
        queue.enqueue("doc-2", "C-2", Stage::Extracted).unwrap();
        queue.claim_next("w").unwrap().unwrap();

        let counts = queue.counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);
    }

    #[test]
    fn test_list_filters_by_status() {
        let queue = test_queue(1);
        for id in ["doc-1", "doc-2", "doc-3"] {
            queue.enqueue(id, "C-1", Stage::Extracted).unwrap();
        }
        let claimed = queue.claim_next("w").unwrap().unwrap();
        queue.fail(&claimed, "unreadable").unwrap();

        let (failed, total) = queue
            .list(&JobFilter {
                status: Some(JobStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(failed[0].document_id, claimed.document_id);

        let (pending, total) = queue
            .list(&JobFilter {
                status: Some(JobStatus::Pending),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(pending.len(), 1);
    }
}
