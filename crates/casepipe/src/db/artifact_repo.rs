//! Derived artifacts - chunks, embedding metadata, per-kind stage results
//! and the stage-output audit trail.
//!
//! One-to-many collections are replaced wholesale inside a transaction so
//! a stage can run any number of times and leave the same rows behind.

use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::pipeline::Stage;

/// A stored text chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRecord {
    pub document_id: String,
    pub chunk_index: u32,
    pub case_identifier: String,
    pub text: String,
}

impl ChunkRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            document_id: row.get("document_id")?,
            chunk_index: row.get("chunk_index")?,
            case_identifier: row.get("case_identifier")?,
            text: row.get("text")?,
        })
    }
}

/// Kinds of single-valued stage results kept per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Facts,
    Summary,
    Translation,
    Prediction,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Facts => "facts",
            ArtifactKind::Summary => "summary",
            ArtifactKind::Translation => "translation",
            ArtifactKind::Prediction => "prediction",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An earlier prediction together with the text it was made on.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalPrediction {
    pub case_identifier: String,
    pub outcome: String,
    pub confidence: f64,
    pub text: String,
}

/// One audit entry written by a stage after it ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutput {
    pub id: i64,
    pub document_id: String,
    pub case_identifier: String,
    pub stage: Stage,
    pub output: Value,
    pub created_at: DateTime<Utc>,
}

impl StageOutput {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let output: String = row.get("output")?;
        let created_at: String = row.get("created_at")?;
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            case_identifier: row.get("case_identifier")?,
            stage: row.get("stage")?,
            output: serde_json::from_str(&output).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            created_at: parse_timestamp(5, &created_at)?,
        })
    }
}

/// Replaces the chunk set of a document. Returns the number of chunks stored.
pub fn replace_chunks(
    db: &Database,
    document_id: &str,
    case_identifier: &str,
    chunks: &[String],
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let stamp = format_timestamp(now);
    db.with_tx(|tx| {
        tx.execute(
            "DELETE FROM case_chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        let mut stmt = tx.prepare(
            "INSERT INTO case_chunks (document_id, chunk_index, case_identifier, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (index, text) in chunks.iter().enumerate() {
            stmt.execute(params![document_id, index as u32, case_identifier, text, stamp])?;
        }
        Ok(chunks.len())
    })
}

/// Loads the chunks of one document in order.
pub fn load_chunks(db: &Database, document_id: &str) -> Result<Vec<ChunkRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT document_id, chunk_index, case_identifier, text FROM case_chunks
             WHERE document_id = ?1 ORDER BY chunk_index ASC",
        )?;
        let rows = stmt
            .query_map(params![document_id], ChunkRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Loads every stored chunk, used to rebuild the vector index.
pub fn all_chunks(db: &Database) -> Result<Vec<ChunkRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT document_id, chunk_index, case_identifier, text FROM case_chunks
             ORDER BY document_id ASC, chunk_index ASC",
        )?;
        let rows = stmt
            .query_map([], ChunkRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Replaces the embedding metadata rows of a document, one per embedded chunk.
pub fn replace_embeddings(
    db: &Database,
    document_id: &str,
    case_identifier: &str,
    chunk_indexes: &[u32],
    model: &str,
    dimension: usize,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let stamp = format_timestamp(now);
    db.with_tx(|tx| {
        tx.execute(
            "DELETE FROM embeddings_metadata WHERE document_id = ?1",
            params![document_id],
        )?;
        let mut stmt = tx.prepare(
            "INSERT INTO embeddings_metadata
             (document_id, chunk_index, case_identifier, model, dimension, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for index in chunk_indexes {
            stmt.execute(params![
                document_id,
                index,
                case_identifier,
                model,
                dimension as i64,
                stamp
            ])?;
        }
        Ok(chunk_indexes.len())
    })
}

pub fn count_embeddings(db: &Database, document_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM embeddings_metadata WHERE document_id = ?1",
            params![document_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Stores the artifact of `kind` for a document, replacing any earlier one.
pub fn upsert_artifact(
    db: &Database,
    document_id: &str,
    case_identifier: &str,
    kind: ArtifactKind,
    payload: &Value,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let payload = serde_json::to_string(payload)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO case_artifacts (document_id, kind, case_identifier, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(document_id, kind) DO UPDATE SET
               case_identifier = excluded.case_identifier,
               payload = excluded.payload,
               updated_at = excluded.updated_at",
            params![
                document_id,
                kind.as_str(),
                case_identifier,
                payload,
                format_timestamp(now)
            ],
        )?;
        Ok(())
    })
}

pub fn find_artifact(
    db: &Database,
    document_id: &str,
    kind: ArtifactKind,
) -> Result<Option<Value>, DatabaseError> {
    let payload: Option<String> = db.with_conn(|conn| {
        let payload = conn
            .query_row(
                "SELECT payload FROM case_artifacts WHERE document_id = ?1 AND kind = ?2",
                params![document_id, kind.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(payload)
    })?;

    match payload {
        Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
        None => Ok(None),
    }
}

/// Earlier predictions for other documents, newest first.
pub fn prediction_history(
    db: &Database,
    exclude_document_id: &str,
    limit: u64,
) -> Result<Vec<HistoricalPrediction>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT a.case_identifier,
                    json_extract(a.payload, '$.outcome') AS outcome,
                    COALESCE(json_extract(a.payload, '$.confidence'), 0.5) AS confidence,
                    COALESCE(json_extract(d.body, '$.judgment_text.clean_text'),
                             json_extract(d.body, '$.judgment_text.raw_text'), '') AS text
             FROM case_artifacts a
             JOIN documents d ON d.document_id = a.document_id
             WHERE a.kind = 'prediction' AND a.document_id != ?1
             ORDER BY a.updated_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![exclude_document_id, limit as i64], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(case_identifier, outcome, confidence, text)| {
                outcome.map(|outcome| HistoricalPrediction {
                    case_identifier,
                    outcome,
                    confidence,
                    text,
                })
            })
            .collect())
    })
}

/// Appends an audit entry for a stage run.
pub fn append_stage_output(
    db: &Database,
    document_id: &str,
    case_identifier: &str,
    stage: Stage,
    output: &Value,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    let output = serde_json::to_string(output)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO stage_outputs (document_id, case_identifier, stage, output, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                document_id,
                case_identifier,
                stage,
                output,
                format_timestamp(now)
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// The audit trail of one document, oldest first.
pub fn stage_outputs_for(
    db: &Database,
    document_id: &str,
) -> Result<Vec<StageOutput>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, document_id, case_identifier, stage, output, created_at
             FROM stage_outputs WHERE document_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![document_id], StageOutput::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// The latest audit entries across all documents, newest first.
pub fn recent_stage_outputs(db: &Database, limit: u64) -> Result<Vec<StageOutput>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, document_id, case_identifier, stage, output, created_at
             FROM stage_outputs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], StageOutput::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::document_repo;
    use crate::document::Document;
    use serde_json::json;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn chunks(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_replace_chunks_is_idempotent() {
        let db = test_db();
        let set = chunks(&["a b c", "c d e"]);
        replace_chunks(&db, "doc-1", "C-1", &set, Utc::now()).unwrap();
        replace_chunks(&db, "doc-1", "C-1", &set, Utc::now()).unwrap();

        let stored = load_chunks(&db, "doc-1").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].chunk_index, 0);
        assert_eq!(stored[1].text, "c d e");
    }

    #[test]
    fn test_replace_chunks_shrinks_set() {
        let db = test_db();
        replace_chunks(&db, "doc-1", "C-1", &chunks(&["a", "b", "c"]), Utc::now()).unwrap();
        replace_chunks(&db, "doc-1", "C-1", &chunks(&["a"]), Utc::now()).unwrap();
        replace_chunks(&db, "doc-2", "C-2", &chunks(&["z"]), Utc::now()).unwrap();

        assert_eq!(load_chunks(&db, "doc-1").unwrap().len(), 1);
        assert_eq!(all_chunks(&db).unwrap().len(), 2);
    }

    #[test]
    fn test_replace_embeddings() {
        let db = test_db();
        replace_embeddings(&db, "doc-1", "C-1", &[0, 1, 2], "hash", 384, Utc::now()).unwrap();
        replace_embeddings(&db, "doc-1", "C-1", &[0, 1], "hash", 384, Utc::now()).unwrap();
        assert_eq!(count_embeddings(&db, "doc-1").unwrap(), 2);
    }

    #[test]
    fn test_artifact_upsert_replaces() {
        let db = test_db();
        upsert_artifact(&db, "doc-1", "C-1", ArtifactKind::Summary, &json!({"v": 1}), Utc::now())
            .unwrap();
        upsert_artifact(&db, "doc-1", "C-1", ArtifactKind::Summary, &json!({"v": 2}), Utc::now())
            .unwrap();

        let found = find_artifact(&db, "doc-1", ArtifactKind::Summary)
            .unwrap()
            .unwrap();
        assert_eq!(found["v"], 2);
        assert!(find_artifact(&db, "doc-1", ArtifactKind::Facts)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_prediction_history_excludes_current_document() {
        let db = test_db();
        for id in ["doc-1", "doc-2"] {
            let doc = Document::new(id, id, "upload", "bail granted", Utc::now());
            document_repo::insert(&db, &doc).unwrap();
            upsert_artifact(
                &db,
                id,
                id,
                ArtifactKind::Prediction,
                &json!({"outcome": "Likely to Win", "confidence": 0.7}),
                Utc::now(),
            )
            .unwrap();
        }

        let history = prediction_history(&db, "doc-1", 100).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].case_identifier, "doc-2");
        assert_eq!(history[0].text, "bail granted");
        assert!((history[0].confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stage_output_trail() {
        let db = test_db();
        append_stage_output(&db, "doc-1", "C-1", Stage::Extracted, &json!({"a": 1}), Utc::now())
            .unwrap();
        append_stage_output(&db, "doc-1", "C-1", Stage::Cleaned, &json!({"b": 2}), Utc::now())
            .unwrap();
        append_stage_output(&db, "doc-2", "C-2", Stage::Extracted, &json!({}), Utc::now())
            .unwrap();

        let trail = stage_outputs_for(&db, "doc-1").unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].stage, Stage::Extracted);
        assert_eq!(trail[1].output["b"], 2);

        let recent = recent_stage_outputs(&db, 1).unwrap();
        assert_eq!(recent[0].document_id, "doc-2");
    }
}
