//! Document repository - JSON document bodies in the `documents` table.
//!
//! Partial updates go through SQLite's `json_set`, so concurrent writers of
//! different sections never overwrite each other's fields.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};

use super::{format_timestamp, Database, DatabaseError};
use crate::document::{Document, DocumentPatch, ErrorLogEntry};

/// Converts a dotted field path to a JSON path, rejecting anything that is
/// not a plain identifier segment.
fn json_path(path: &str) -> Result<String, DatabaseError> {
    let valid = !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        return Err(DatabaseError::InvalidFieldPath(path.to_string()));
    }
    Ok(format!("$.{}", path))
}

/// Inserts a new document.
pub fn insert(db: &Database, doc: &Document) -> Result<(), DatabaseError> {
    let body = serde_json::to_string(doc)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO documents (document_id, case_identifier, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                doc.document_id,
                doc.case_number,
                body,
                format_timestamp(doc.created_at),
                format_timestamp(doc.last_updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Finds a document by ID.
pub fn find(db: &Database, document_id: &str) -> Result<Option<Document>, DatabaseError> {
    let body: Option<String> = db.with_conn(|conn| {
        let body = conn
            .query_row(
                "SELECT body FROM documents WHERE document_id = ?1",
                params![document_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(body)
    })?;

    match body {
        Some(body) => Ok(Some(serde_json::from_str(&body)?)),
        None => Ok(None),
    }
}

/// Applies a partial update. Always stamps `last_updated_at`.
///
/// Returns `false` if the document does not exist.
pub fn update(
    db: &Database,
    document_id: &str,
    patch: &DocumentPatch,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let stamp = format_timestamp(now);

    let mut values: Vec<String> = vec![document_id.to_string(), stamp.clone()];
    let mut set_args = vec!["'$.last_updated_at'".to_string(), "?2".to_string()];
    for (path, value) in patch.assignments() {
        values.push(json_path(path)?);
        set_args.push(format!("?{}", values.len()));
        values.push(serde_json::to_string(value)?);
        set_args.push(format!("json(?{})", values.len()));
    }

    let sql = format!(
        "UPDATE documents SET body = json_set(body, {}), updated_at = ?2 WHERE document_id = ?1",
        set_args.join(", ")
    );

    db.with_conn(|conn| {
        let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(changed > 0)
    })
}

/// Marks the document failed and appends an entry to its error log, in one
/// statement.
pub fn record_failure(
    db: &Database,
    document_id: &str,
    entry: &ErrorLogEntry,
) -> Result<bool, DatabaseError> {
    let entry_json = serde_json::to_string(entry)?;
    let stamp = format_timestamp(entry.at);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE documents
             SET body = json_insert(
                     json_set(body, '$.processing_status', 'failed', '$.last_updated_at', ?2),
                     '$.error_logs[#]', json(?3)),
                 updated_at = ?2
             WHERE document_id = ?1",
            params![document_id, stamp, entry_json],
        )?;
        Ok(changed > 0)
    })
}

/// Returns the most recently updated documents.
pub fn list_recent(db: &Database, limit: u64) -> Result<Vec<Document>, DatabaseError> {
    let bodies: Vec<String> = db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT body FROM documents ORDER BY updated_at DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(DatabaseError::from))
        .collect()
}

/// Counts stored documents.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        Ok(count)
    })
}
