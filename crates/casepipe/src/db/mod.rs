//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access through one handle is serialized through a `Mutex<Connection>`.
//! Separate handles (other threads or processes) opened on the same file
//! coordinate through SQLite's own locking, which is what the job queue's
//! single-statement claim relies on.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

pub mod artifact_repo;
pub mod document_repo;
pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod stats_repo;

pub use error::DatabaseError;
pub use migrations::Schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled for file databases
/// so readers never block the claim loop.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    fence: Option<Arc<LeaseFence>>,
}

/// The job lease a fenced handle must still hold for its statements to run.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LeaseFence {
    job_id: String,
    lease_token: String,
}

impl LeaseFence {
    fn check(&self, conn: &Connection) -> Result<(), DatabaseError> {
        let held: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM jobs
                 WHERE job_id = ?1 AND status = 'processing' AND lease_token = ?2)",
            params![self.job_id, self.lease_token],
            |r| r.get(0),
        )?;
        if held {
            Ok(())
        } else {
            Err(DatabaseError::LeaseRevoked {
                job_id: self.job_id.clone(),
            })
        }
    }
}

impl Database {
    /// Opens (or creates) the pipeline database at the given path and runs
    /// all pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with_schema(path, Schema::Pipeline)
    }

    /// Opens an in-memory pipeline database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::open_in_memory_with_schema(Schema::Pipeline)
    }

    /// Opens (or creates) a database file with the given schema.
    pub fn open_with_schema(path: &Path, schema: Schema) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn, schema)?;

        log::info!("Database opened at {} ({:?})", path.display(), schema);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            fence: None,
        })
    }

    /// Opens an in-memory database with the given schema.
    pub fn open_in_memory_with_schema(schema: Schema) -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn, schema)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            fence: None,
        })
    }

    /// Returns a handle on the same connection whose every access first
    /// checks that `job_id` is still `processing` under `lease_token`.
    ///
    /// The check and the statements run in one immediate transaction, so
    /// once the lease is revoked nothing issued through this handle lands.
    /// Fails with [`DatabaseError::LeaseRevoked`] otherwise.
    pub fn fenced(&self, job_id: &str, lease_token: &str) -> Database {
        Self {
            conn: Arc::clone(&self.conn),
            fence: Some(Arc::new(LeaseFence {
                job_id: job_id.to_string(),
                lease_token: lease_token.to_string(),
            })),
        }
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        match &self.fence {
            None => f(&conn),
            Some(fence) => {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                fence.check(&tx)?;
                let value = f(&tx)?;
                tx.commit()?;
                Ok(value)
            }
        }
    }

    /// Runs `f` inside a transaction that commits only if `f` succeeds.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = match &self.fence {
            None => conn.transaction()?,
            Some(fence) => {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                fence.check(&tx)?;
                tx
            }
        };
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Returns the canonical database path: `~/.casepipe/data/casepipe.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".casepipe").join("data").join("casepipe.db"))
}

/// Formats a timestamp for storage.
///
/// Fixed nanosecond precision keeps lexical order equal to chronological
/// order, which the claim query's `ORDER BY updated_at` depends on.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses a stored timestamp inside a row mapper.
pub(crate) fn parse_timestamp(
    idx: usize,
    raw: &str,
) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.ends_with("casepipe.db"));
        assert!(path.to_string_lossy().contains(".casepipe"));
    }

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO case_chunks (document_id, chunk_index, case_identifier, text, created_at)
                 VALUES ('d1', 0, 'C-1', 'hello', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Err(DatabaseError::LockPoisoned)
        });
        assert!(result.is_err());

        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM case_chunks", [], |r| r.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2026-01-01T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let fa = format_timestamp(a);
        let fb = format_timestamp(b);
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert_eq!(parse_timestamp(0, &fb).unwrap(), b);
    }

    fn insert_claimed_job(db: &Database, token: &str) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (job_id, document_id, case_identifier, stage, status,
                 lease_owner, lease_token, created_at, updated_at)
                 VALUES ('j1', 'd1', 'C-1', 'cleaned', 'processing', 'w1', ?1, 'x', 'x')",
                params![token],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn chunk_count(db: &Database) -> u32 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM case_chunks", [], |r| r.get(0))?)
        })
        .unwrap()
    }

    const INSERT_CHUNK: &str =
        "INSERT INTO case_chunks (document_id, chunk_index, case_identifier, text, created_at)
         VALUES ('d1', 0, 'C-1', 'hello', '2026-01-01T00:00:00Z')";

    #[test]
    fn test_fenced_handle_writes_while_lease_held() {
        let db = Database::open_in_memory().unwrap();
        insert_claimed_job(&db, "t1");

        let fenced = db.fenced("j1", "t1");
        fenced
            .with_tx(|tx| {
                tx.execute(INSERT_CHUNK, [])?;
                Ok(())
            })
            .unwrap();
        assert_eq!(chunk_count(&db), 1);
    }

    #[test]
    fn test_fenced_handle_rejects_revoked_lease() {
        let db = Database::open_in_memory().unwrap();
        insert_claimed_job(&db, "t1");
        let fenced = db.fenced("j1", "t1");

        db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'retry', lease_owner = NULL, lease_token = NULL
                 WHERE job_id = 'j1'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let result = fenced.with_conn(|conn| {
            conn.execute(INSERT_CHUNK, [])?;
            Ok(())
        });
        assert!(matches!(
            result,
            Err(DatabaseError::LeaseRevoked { ref job_id }) if job_id == "j1"
        ));
        assert_eq!(chunk_count(&db), 0);
    }

    #[test]
    fn test_fenced_handle_rejects_newer_claim() {
        let db = Database::open_in_memory().unwrap();
        insert_claimed_job(&db, "t2");

        let result = db.fenced("j1", "t1").with_tx(|tx| {
            tx.execute(INSERT_CHUNK, [])?;
            Ok(())
        });
        assert!(matches!(result, Err(DatabaseError::LeaseRevoked { .. })));
        assert_eq!(chunk_count(&db), 0);
    }
}
