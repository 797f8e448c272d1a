//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored document body could not be (de)serialized.
    #[error("Invalid document JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A document patch referenced a field path that is not allowed.
    #[error("Invalid field path '{0}'")]
    InvalidFieldPath(String),

    /// A lease-fenced handle no longer holds the job's lease.
    #[error("Lease on job {job_id} was revoked")]
    LeaseRevoked { job_id: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}
