//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order. The pipeline store and the relational mirror
//! are separate databases, each with its own migration list.

use rusqlite::Connection;

use super::error::DatabaseError;

/// Which set of tables a database carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Job queue, documents, chunks, artifacts and the stage audit log.
    Pipeline,
    /// Structured case metadata for reporting and joins.
    Mirror,
}

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const PIPELINE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_documents_table",
        sql: include_str!("sql/002_create_documents.sql"),
    },
    Migration {
        version: 3,
        description: "create_chunk_tables",
        sql: include_str!("sql/003_create_case_chunks.sql"),
    },
    Migration {
        version: 4,
        description: "create_case_artifacts_table",
        sql: include_str!("sql/004_create_case_artifacts.sql"),
    },
    Migration {
        version: 5,
        description: "create_stage_outputs_table",
        sql: include_str!("sql/005_create_stage_outputs.sql"),
    },
];

const MIRROR_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_cases_table",
        sql: include_str!("sql/101_create_cases.sql"),
    },
    Migration {
        version: 2,
        description: "create_case_detail_tables",
        sql: include_str!("sql/102_create_case_details.sql"),
    },
    Migration {
        version: 3,
        description: "create_system_logs_table",
        sql: include_str!("sql/103_create_system_logs.sql"),
    },
];

impl Schema {
    fn migrations(self) -> &'static [Migration] {
        match self {
            Schema::Pipeline => PIPELINE_MIGRATIONS,
            Schema::Mirror => MIRROR_MIGRATIONS,
        }
    }
}

/// Runs all pending migrations of `schema` on the given connection.
pub fn run_all(conn: &Connection, schema: Schema) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in schema.migrations() {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running {:?} migration v{}: {}",
            schema,
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}
