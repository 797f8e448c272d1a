//! Job repository - atomic state transitions on the `jobs` table.
//!
//! Every transition is a single `UPDATE … RETURNING` (or upsert) statement,
//! so no other connection can observe a claim or release half-applied.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::pipeline::Stage;
use crate::queue::{Job, JobStatus, WorkerLease};

const JOB_COLUMNS: &str = "job_id, document_id, case_identifier, stage, status, attempts, \
     lease_owner, lease_token, claimed_at, last_error, created_at, updated_at, finished_at";

impl ToSql for Stage {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Stage {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    let lease_owner: Option<String> = row.get("lease_owner")?;
    let lease_token: Option<String> = row.get("lease_token")?;
    let claimed_at: Option<String> = row.get("claimed_at")?;
    let lease = match (lease_owner, lease_token, claimed_at) {
        (Some(owner), Some(token), Some(claimed_at)) => Some(WorkerLease {
            owner,
            token,
            claimed_at: parse_timestamp(8, &claimed_at)?,
        }),
        _ => None,
    };

    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let finished_at: Option<String> = row.get("finished_at")?;

    Ok(Job {
        job_id: row.get("job_id")?,
        document_id: row.get("document_id")?,
        case_identifier: row.get("case_identifier")?,
        stage: row.get("stage")?,
        status: row.get("status")?,
        attempts: row.get("attempts")?,
        lease,
        last_error: row.get("last_error")?,
        created_at: parse_timestamp(10, &created_at)?,
        updated_at: parse_timestamp(11, &updated_at)?,
        finished_at: finished_at
            .as_deref()
            .map(|raw| parse_timestamp(12, raw))
            .transpose()?,
    })
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub stage: Option<Stage>,
    pub case_identifier: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Creates the job for `document_id`, or resets the existing one to
/// `pending` at `stage`.
///
/// Returns `None` when the existing job is currently `processing`; the
/// running worker keeps exclusive ownership of the document.
pub fn upsert(
    db: &Database,
    new_job_id: &str,
    document_id: &str,
    case_identifier: &str,
    stage: Stage,
    now: DateTime<Utc>,
) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "INSERT INTO jobs (job_id, document_id, case_identifier, stage, status, attempts,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)
             ON CONFLICT(document_id) DO UPDATE SET
               case_identifier = excluded.case_identifier,
               stage = excluded.stage,
               status = 'pending',
               last_error = NULL,
               finished_at = NULL,
               updated_at = excluded.updated_at
             WHERE jobs.status != 'processing'
             RETURNING {}",
            JOB_COLUMNS
        );
        let job = conn
            .query_row(
                &sql,
                params![
                    new_job_id,
                    document_id,
                    case_identifier,
                    stage,
                    format_timestamp(now)
                ],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Atomically claims the oldest eligible job for `owner`.
pub fn claim_next(
    db: &Database,
    owner: &str,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE jobs
             SET status = 'processing', lease_owner = ?1, lease_token = ?2,
                 claimed_at = ?3, updated_at = ?3
             WHERE job_id = (
                 SELECT job_id FROM jobs
                 WHERE status IN ('pending', 'retry')
                 ORDER BY updated_at ASC, job_id ASC
                 LIMIT 1
             )
             AND status IN ('pending', 'retry')
             RETURNING {}",
            JOB_COLUMNS
        );
        let job = conn
            .query_row(&sql, params![owner, token, format_timestamp(now)], job_from_row)
            .optional()?;
        Ok(job)
    })
}

/// Moves a claimed job to `next` and makes it claimable again.
///
/// Returns `None` if the lease token no longer matches.
pub fn advance(
    db: &Database,
    job_id: &str,
    lease_token: &str,
    next: Stage,
    reset_attempts: bool,
    now: DateTime<Utc>,
) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE jobs
             SET stage = ?3, status = 'pending',
                 attempts = CASE WHEN ?4 THEN 0 ELSE attempts END,
                 lease_owner = NULL, lease_token = NULL, claimed_at = NULL,
                 updated_at = ?5
             WHERE job_id = ?1 AND status = 'processing' AND lease_token = ?2
             RETURNING {}",
            JOB_COLUMNS
        );
        let job = conn
            .query_row(
                &sql,
                params![job_id, lease_token, next, reset_attempts, format_timestamp(now)],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Marks a claimed job completed. The stage keeps its last value.
pub fn complete(
    db: &Database,
    job_id: &str,
    lease_token: &str,
    now: DateTime<Utc>,
) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE jobs
             SET status = 'completed', finished_at = ?3,
                 lease_owner = NULL, lease_token = NULL, claimed_at = NULL,
                 updated_at = ?3
             WHERE job_id = ?1 AND status = 'processing' AND lease_token = ?2
             RETURNING {}",
            JOB_COLUMNS
        );
        let job = conn
            .query_row(
                &sql,
                params![job_id, lease_token, format_timestamp(now)],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Records a failed attempt: increments `attempts` and moves the job to
/// `retry`, or to `failed` once `max_retries` attempts have failed.
pub fn record_failure(
    db: &Database,
    job_id: &str,
    lease_token: &str,
    error: &str,
    max_retries: u32,
    now: DateTime<Utc>,
) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        // Right-hand side column references see the pre-update row.
        let sql = format!(
            "UPDATE jobs
             SET attempts = attempts + 1,
                 status = CASE WHEN attempts + 1 >= ?3 THEN 'failed' ELSE 'retry' END,
                 last_error = ?4,
                 lease_owner = NULL, lease_token = NULL, claimed_at = NULL,
                 updated_at = ?5
             WHERE job_id = ?1 AND status = 'processing' AND lease_token = ?2
             RETURNING {}",
            JOB_COLUMNS
        );
        let job = conn
            .query_row(
                &sql,
                params![job_id, lease_token, max_retries, error, format_timestamp(now)],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, job_id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("SELECT {} FROM jobs WHERE job_id = ?1", JOB_COLUMNS);
        let job = conn
            .query_row(&sql, params![job_id], job_from_row)
            .optional()?;
        Ok(job)
    })
}

/// Finds the job owning `document_id`.
pub fn find_by_document(db: &Database, document_id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("SELECT {} FROM jobs WHERE document_id = ?1", JOB_COLUMNS);
        let job = conn
            .query_row(&sql, params![document_id], job_from_row)
            .optional()?;
        Ok(job)
    })
}

/// Returns `processing` jobs claimed before `cutoff`.
pub fn find_expired_leases(
    db: &Database,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM jobs
             WHERE status = 'processing' AND claimed_at < ?1
             ORDER BY claimed_at ASC",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![format_timestamp(cutoff)], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<Job>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status));
        }
        if let Some(stage) = filter.stage {
            conditions.push(format!("stage = ?{}", param_values.len() + 1));
            param_values.push(Box::new(stage));
        }
        if let Some(ref case_identifier) = filter.case_identifier {
            conditions.push(format!("case_identifier = ?{}", param_values.len() + 1));
            param_values.push(Box::new(case_identifier.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT {} FROM jobs {} ORDER BY updated_at DESC, job_id ASC LIMIT ?{} OFFSET ?{}",
            JOB_COLUMNS,
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<Job> = stmt
            .query_map(params_ref.as_slice(), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Overwrites `updated_at` directly. Lets tests pin claim order.
#[cfg(test)]
pub(crate) fn set_updated_at(
    db: &Database,
    job_id: &str,
    updated_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET updated_at = ?2 WHERE job_id = ?1",
            params![job_id, format_timestamp(updated_at)],
        )?;
        Ok(())
    })
}
