use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Error, Debug)]
pub enum CasepipeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] crate::mirror::MirrorError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Errors raised by job queue transitions.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    /// The document already has a job that a worker is executing.
    #[error("Job {job_id} is currently being processed")]
    JobInFlight { job_id: String },

    /// The caller no longer holds the lease it claimed the job with.
    #[error("Lease on job {job_id} was lost")]
    LeaseLost { job_id: String },
}

/// Errors that abort one stage attempt. Every variant is routed through
/// the queue's `fail` transition.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Document {document_id} not found")]
    DocumentMissing { document_id: String },

    #[error("No stage function registered for stage '{0}'")]
    Unregistered(Stage),

    #[error("Stage '{from}' returned '{to}', which does not move forward")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Stage '{stage}' timed out after {seconds}s")]
    Timeout { stage: Stage, seconds: u64 },

    #[error("Stage '{stage}' panicked")]
    Panicked { stage: Stage },

    #[error("Failed to spawn stage execution: {0}")]
    Spawn(String),

    #[error("Collaborator '{name}' failed: {message}")]
    Collaborator { name: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl From<crate::collab::CollabError> for StageError {
    fn from(err: crate::collab::CollabError) -> Self {
        match err {
            crate::collab::CollabError::Unavailable { name, message } => {
                StageError::Collaborator { name, message }
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler did not stop within {0}s")]
    JoinTimeout(u64),

    #[error("Scheduler thread panicked")]
    Panicked,

    #[error("Failed to install signal handler: {0}")]
    Signal(String),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Judgment text is empty")]
    EmptyText,

    #[error("Failed to read judgment '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, CasepipeError>;

/// Logs and discards the error of a write that must never decide a job's
/// outcome (mirror rows, audit entries, document failure notes).
pub fn best_effort<T, E: std::fmt::Display>(
    what: &str,
    result: std::result::Result<T, E>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Best-effort {} failed: {}", what, e);
            None
        }
    }
}
