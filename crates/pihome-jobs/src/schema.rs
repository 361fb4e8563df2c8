//! Database schema management.

use std::time::Duration;

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Apply connection pragmas. Call before [`init_schema`].
pub fn configure(conn: &Connection, busy_timeout: Duration, wal: bool) -> Result<(), Error> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    if wal {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "Configured journal mode");
    }
    Ok(())
}

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- Recurring job catalog
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    job_type TEXT NOT NULL CHECK (job_type IN ('CRON', 'MANUAL')),
    cron TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    params TEXT NOT NULL DEFAULT '{}',
    last_run_started_at TEXT,
    last_run_finished_at TEXT,
    last_run_status TEXT,
    last_run_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((job_type = 'CRON') = (cron IS NOT NULL))
);

-- One row per run attempt, kept as an audit trail
CREATE TABLE IF NOT EXISTS executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER REFERENCES jobs(id) ON DELETE SET NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL
        CHECK (status IN ('QUEUED', 'RUNNING', 'SUCCESS', 'ERROR', 'SKIPPED')),
    params TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    runtime_ms INTEGER,
    summary TEXT,
    error TEXT
);

-- Per-run log lines
CREATE TABLE IF NOT EXISTS job_log_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    UNIQUE (execution_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(job_type, enabled);
CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status, created_at, id);
CREATE INDEX IF NOT EXISTS idx_executions_job ON executions(job_id, created_at);

-- At most one QUEUED/RUNNING execution per job
CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_one_active
    ON executions(job_id)
    WHERE job_id IS NOT NULL AND status IN ('QUEUED', 'RUNNING');
"#;
