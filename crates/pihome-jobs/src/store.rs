//! SQLite-backed job catalog and execution records.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};
use serde_json::Value;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::error::{JobError, JobResult};
use crate::schema::{configure, init_schema};
use crate::timestamp::{from_db, opt_from_db, to_db};
use crate::types::{Execution, ExecutionStatus, Job, JobKind, JobLogEntry, JobSpec, LogLevel};

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

pub(crate) const JOB_COLUMNS: &str = "id, name, kind, job_type, cron, enabled, params, \
     last_run_started_at, last_run_finished_at, last_run_status, last_run_message, \
     created_at, updated_at";

pub(crate) const EXECUTION_COLUMNS: &str = "id, job_id, kind, status, params, created_at, \
     started_at, finished_at, runtime_ms, summary, error";

/// Whether an upsert created a row or changed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Shared handle to the job database.
///
/// Cloning is cheap; clones share one connection thread.
#[derive(Clone)]
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (or create) a file-backed database.
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> JobResult<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "Opening job database");
        let conn = Connection::open(path).await?;
        conn.call(move |conn| {
            configure(conn, busy_timeout, true)?;
            init_schema(conn)
        })
        .await?;
        Ok(Self { conn })
    }

    /// Create a new in-memory database.
    pub async fn in_memory() -> JobResult<Self> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            configure(conn, Duration::from_secs(5), false)?;
            init_schema(conn)
        })
        .await?;
        Ok(Self { conn })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert or update a job by name. Never touches the `last_run_*` cache.
    pub async fn upsert_job(&self, spec: JobSpec) -> JobResult<(Job, UpsertOutcome)> {
        let name = spec.name.clone();
        let outcome = self.upsert_jobs(vec![spec]).await?;
        let job = self
            .get_job_by_name(&name)
            .await?
            .ok_or_else(|| JobError::JobNotFound(name))?;
        let outcome = outcome.into_iter().next().unwrap_or(UpsertOutcome::Created);
        Ok((job, outcome))
    }

    /// Upsert several jobs in one transaction.
    pub async fn upsert_jobs(&self, specs: Vec<JobSpec>) -> JobResult<Vec<UpsertOutcome>> {
        for spec in &specs {
            spec.validate()?;
        }
        let now = to_db(Utc::now());
        let rows = specs
            .into_iter()
            .map(|spec| {
                let params = serde_json::to_string(&spec.params)?;
                Ok((spec, params))
            })
            .collect::<JobResult<Vec<_>>>()?;

        let outcomes = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut outcomes = Vec::with_capacity(rows.len());
                for (spec, params) in rows {
                    let existing: Option<i64> = tx
                        .query_row("SELECT id FROM jobs WHERE name = ?1", [&spec.name], |row| {
                            row.get(0)
                        })
                        .optional()?;
                    match existing {
                        Some(id) => {
                            tx.execute(
                                "UPDATE jobs SET kind = ?1, job_type = ?2, cron = ?3, enabled = ?4,
                                 params = ?5, updated_at = ?6 WHERE id = ?7",
                                params![
                                    spec.kind.as_str(),
                                    spec.job_type.as_str(),
                                    spec.cron,
                                    spec.enabled,
                                    params,
                                    now,
                                    id
                                ],
                            )?;
                            outcomes.push(UpsertOutcome::Updated);
                        }
                        None => {
                            tx.execute(
                                "INSERT INTO jobs (name, kind, job_type, cron, enabled, params,
                                 created_at, updated_at)
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                                params![
                                    spec.name,
                                    spec.kind.as_str(),
                                    spec.job_type.as_str(),
                                    spec.cron,
                                    spec.enabled,
                                    params,
                                    now
                                ],
                            )?;
                            outcomes.push(UpsertOutcome::Created);
                        }
                    }
                }
                tx.commit()?;
                Ok(outcomes)
            })
            .await?;
        Ok(outcomes)
    }

    pub async fn get_job(&self, id: i64) -> JobResult<Option<Job>> {
        let job = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
                Ok(conn.query_row(&sql, [id], job_from_row).optional()?)
            })
            .await?;
        Ok(job)
    }

    pub async fn get_job_by_name(&self, name: &str) -> JobResult<Option<Job>> {
        let name = name.to_string();
        let job = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE name = ?1");
                Ok(conn.query_row(&sql, [name], job_from_row).optional()?)
            })
            .await?;
        Ok(job)
    }

    /// All jobs ordered by name.
    pub async fn list_jobs(&self) -> JobResult<Vec<Job>> {
        let jobs = self
            .conn
            .call(|conn| {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY name");
                let mut stmt = conn.prepare(&sql)?;
                let jobs = stmt
                    .query_map([], job_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(jobs)
            })
            .await?;
        Ok(jobs)
    }

    /// Create an execution directly, in QUEUED or RUNNING.
    ///
    /// Refuses with [`JobError::AlreadyActive`] when the job already has
    /// a QUEUED or RUNNING execution.
    pub async fn create_execution(
        &self,
        job_id: Option<i64>,
        kind: JobKind,
        status: ExecutionStatus,
        params: Value,
    ) -> JobResult<Execution> {
        if !status.is_active() {
            return Err(JobError::InvalidJob(format!(
                "executions start QUEUED or RUNNING, not {status}"
            )));
        }
        let params = serde_json::to_string(&params)?;
        let now = Utc::now();

        let created = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if let Some(job_id) = job_id {
                    let name: Option<String> = tx
                        .query_row("SELECT name FROM jobs WHERE id = ?1", [job_id], |row| {
                            row.get(0)
                        })
                        .optional()?;
                    let Some(name) = name else {
                        return Ok(Err(JobError::JobNotFound(job_id.to_string())));
                    };
                    if has_active_execution(&tx, job_id)? {
                        return Ok(Err(JobError::AlreadyActive(name)));
                    }
                }
                let id = insert_execution(&tx, job_id, kind, status, &params, now)?;
                let execution = load_execution(&tx, id)?;
                tx.commit()?;
                Ok(Ok(execution))
            })
            .await??;

        created.ok_or_else(|| JobError::InvalidJob("execution vanished after insert".to_string()))
    }

    pub async fn get_execution(&self, id: i64) -> JobResult<Option<Execution>> {
        let execution = self
            .conn
            .call(move |conn| Ok(load_execution(conn, id)?))
            .await?;
        Ok(execution)
    }

    /// Most recent executions first, optionally for one job.
    pub async fn list_executions(
        &self,
        job_id: Option<i64>,
        limit: usize,
    ) -> JobResult<Vec<Execution>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let executions = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {EXECUTION_COLUMNS} FROM executions
                     WHERE ?1 IS NULL OR job_id = ?1
                     ORDER BY id DESC LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![job_id, limit], execution_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(executions)
    }

    /// Log lines of one execution in `seq` order.
    pub async fn list_log_entries(&self, execution_id: i64) -> JobResult<Vec<JobLogEntry>> {
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, execution_id, seq, level, message, context, created_at
                     FROM job_log_entries WHERE execution_id = ?1 ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map([execution_id], log_entry_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(entries)
    }

    /// Append a log line. Returns `false` when the execution is no longer
    /// RUNNING, in which case nothing is written.
    pub(crate) async fn insert_log_entry(
        &self,
        execution_id: i64,
        seq: u32,
        level: LogLevel,
        message: String,
        context: Value,
    ) -> JobResult<bool> {
        let context = serde_json::to_string(&context)?;
        let now = to_db(Utc::now());
        let inserted = self
            .conn
            .call(move |conn| {
                let rows = conn.execute(
                    "INSERT INTO job_log_entries (execution_id, seq, level, message, context, created_at)
                     SELECT ?1, ?2, ?3, ?4, ?5, ?6
                     WHERE EXISTS (SELECT 1 FROM executions WHERE id = ?1 AND status = 'RUNNING')",
                    params![execution_id, seq, level.as_str(), message, context, now],
                )?;
                Ok(rows == 1)
            })
            .await?;
        Ok(inserted)
    }

    /// Whether any execution anywhere is RUNNING.
    pub async fn any_running(&self) -> JobResult<bool> {
        let running = self
            .conn
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM executions WHERE status = 'RUNNING')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await?;
        Ok(running)
    }

    /// Finalize a RUNNING execution to ERROR outside the normal logger path.
    ///
    /// Returns `false` when the execution was no longer RUNNING.
    pub async fn force_error(&self, execution_id: i64, message: String) -> JobResult<bool> {
        let finalize = Finalize {
            execution_id,
            status: ExecutionStatus::Error,
            summary: crate::run_logger::DEFAULT_FAILURE_SUMMARY.to_string(),
            error: Some(message),
            finished_at: Utc::now(),
        };
        let done = self
            .conn
            .call(move |conn| Ok(finalize_execution(conn, &finalize)?))
            .await?;
        Ok(done)
    }
}

/// Values written when an execution leaves RUNNING.
#[derive(Debug, Clone)]
pub(crate) struct Finalize {
    pub execution_id: i64,
    pub status: ExecutionStatus,
    pub summary: String,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// Move a RUNNING execution to its terminal status and mirror the outcome
/// onto the owning job, in one transaction.
///
/// Returns `false` without writing anything if the execution is not RUNNING.
pub(crate) fn finalize_execution(
    conn: &mut rusqlite::Connection,
    fin: &Finalize,
) -> rusqlite::Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let row: Option<(Option<i64>, Option<String>)> = tx
        .query_row(
            "SELECT job_id, started_at FROM executions WHERE id = ?1 AND status = 'RUNNING'",
            [fin.execution_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((job_id, started_at)) = row else {
        return Ok(false);
    };

    let started_at = opt_from_db(1, started_at)?.unwrap_or(fin.finished_at);
    let runtime_ms = (fin.finished_at - started_at).num_milliseconds().max(0);
    let finished = to_db(fin.finished_at);

    let updated = tx.execute(
        "UPDATE executions SET status = ?1, finished_at = ?2, runtime_ms = ?3,
         summary = ?4, error = ?5
         WHERE id = ?6 AND status = 'RUNNING'",
        params![
            fin.status.as_str(),
            finished,
            runtime_ms,
            fin.summary,
            fin.error,
            fin.execution_id
        ],
    )?;
    if updated == 0 {
        return Ok(false);
    }

    if let Some(job_id) = job_id {
        tx.execute(
            "UPDATE jobs SET last_run_status = ?1, last_run_started_at = ?2,
             last_run_finished_at = ?3, last_run_message = ?4
             WHERE id = ?5",
            params![
                fin.status.as_str(),
                to_db(started_at),
                finished,
                fin.summary,
                job_id
            ],
        )?;
    }
    tx.commit()?;
    Ok(true)
}

pub(crate) fn has_active_execution(
    conn: &rusqlite::Connection,
    job_id: i64,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM executions
         WHERE job_id = ?1 AND status IN ('QUEUED', 'RUNNING'))",
        [job_id],
        |row| row.get(0),
    )
}

/// Insert an execution row. RUNNING rows get `started_at = now`.
pub(crate) fn insert_execution(
    conn: &rusqlite::Connection,
    job_id: Option<i64>,
    kind: JobKind,
    status: ExecutionStatus,
    params_json: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    let now = to_db(now);
    let started_at = (status == ExecutionStatus::Running).then(|| now.clone());
    conn.execute(
        "INSERT INTO executions (job_id, kind, status, params, created_at, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![job_id, kind.as_str(), status.as_str(), params_json, now, started_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn load_execution(
    conn: &rusqlite::Connection,
    id: i64,
) -> rusqlite::Result<Option<Execution>> {
    let sql = format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1");
    conn.query_row(&sql, [id], execution_from_row).optional()
}

fn parse_enum<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json(idx: usize, raw: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let kind: String = row.get(2)?;
    let job_type: String = row.get(3)?;
    let params: String = row.get(6)?;
    let last_status: Option<String> = row.get(9)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: parse_enum(2, &kind)?,
        job_type: parse_enum(3, &job_type)?,
        cron: row.get(4)?,
        enabled: row.get(5)?,
        params: parse_json(6, &params)?,
        last_run_started_at: opt_from_db(7, row.get(7)?)?,
        last_run_finished_at: opt_from_db(8, row.get(8)?)?,
        last_run_status: last_status.map(|s| parse_enum(9, &s)).transpose()?,
        last_run_message: row.get(10)?,
        created_at: from_db(11, &created_at)?,
        updated_at: from_db(12, &updated_at)?,
    })
}

pub(crate) fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<Execution> {
    let kind: String = row.get(2)?;
    let status: String = row.get(3)?;
    let params: String = row.get(4)?;
    let created_at: String = row.get(5)?;

    Ok(Execution {
        id: row.get(0)?,
        job_id: row.get(1)?,
        kind: parse_enum(2, &kind)?,
        status: parse_enum(3, &status)?,
        params: parse_json(4, &params)?,
        created_at: from_db(5, &created_at)?,
        started_at: opt_from_db(6, row.get(6)?)?,
        finished_at: opt_from_db(7, row.get(7)?)?,
        runtime_ms: row.get(8)?,
        summary: row.get(9)?,
        error: row.get(10)?,
    })
}

fn log_entry_from_row(row: &Row<'_>) -> rusqlite::Result<JobLogEntry> {
    let level: String = row.get(3)?;
    let context: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(JobLogEntry {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        seq: row.get(2)?,
        level: parse_enum(3, &level)?,
        message: row.get(4)?,
        context: parse_json(5, &context)?,
        created_at: from_db(6, &created_at)?,
    })
}
