//! Job lifecycle events published while the scheduler runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::pipeline::Stage;
use crate::queue::{Job, JobStatus};

/// What happened to a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    Claimed,
    Advanced,
    Retrying,
    Failed,
    Completed,
    /// An expired lease was revoked.
    Recovered,
}

impl std::fmt::Display for PipelineEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineEventKind::Claimed => write!(f, "Claimed"),
            PipelineEventKind::Advanced => write!(f, "Advanced"),
            PipelineEventKind::Retrying => write!(f, "Retrying"),
            PipelineEventKind::Failed => write!(f, "Failed"),
            PipelineEventKind::Completed => write!(f, "Completed"),
            PipelineEventKind::Recovered => write!(f, "Recovered"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    pub job_id: String,
    pub document_id: String,
    pub case_identifier: String,
    pub kind: PipelineEventKind,
    /// The job's stage after the event.
    pub stage: Stage,
    pub attempts: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(job: &Job, kind: PipelineEventKind, message: &str) -> Self {
        Self {
            job_id: job.job_id.clone(),
            document_id: job.document_id.clone(),
            case_identifier: job.case_identifier.clone(),
            kind,
            stage: job.stage,
            attempts: job.attempts,
            message: message.to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// The event for a job that just went through `finish`.
    pub fn finished(job: &Job, from: Stage) -> Self {
        if job.status == JobStatus::Completed {
            Self::new(job, PipelineEventKind::Completed, "Pipeline completed")
        } else {
            Self::new(
                job,
                PipelineEventKind::Advanced,
                &format!("Stage {} finished, next {}", from, job.stage),
            )
        }
    }

    /// The event for a job that just went through `fail`.
    pub fn failed(job: &Job, error: &str) -> Self {
        let (kind, message) = if job.status == JobStatus::Failed {
            (PipelineEventKind::Failed, "Retries exhausted")
        } else {
            (PipelineEventKind::Retrying, "Attempt failed, will retry")
        };
        Self {
            error: Some(error.to_string()),
            ..Self::new(job, kind, message)
        }
    }
}

#[derive(Clone)]
pub struct PipelineEventBroadcaster {
    sender: Arc<broadcast::Sender<PipelineEvent>>,
}

impl PipelineEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: PipelineEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PipelineEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
