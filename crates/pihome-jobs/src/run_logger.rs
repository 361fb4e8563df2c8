//! Per-execution log sink and finalizer.

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::JobResult;
use crate::store::{Finalize, JobStore, finalize_execution};
use crate::types::{ExecutionStatus, JobKind, LogLevel};

#[cfg(test)]
#[path = "run_logger_tests.rs"]
mod tests;

/// Log lines kept per execution; later lines are dropped.
pub const MAX_LINES_PER_RUN: u32 = 500;

/// Summary length cap, in characters.
pub const SUMMARY_MAX_CHARS: usize = 500;

/// Ceiling for the stored failure detail, in bytes.
pub const ERROR_MAX_BYTES: usize = 64 * 1024;

pub const DEFAULT_SUCCESS_SUMMARY: &str = "Job execution succeeded";
pub const DEFAULT_FAILURE_SUMMARY: &str = "Job execution failed";

#[derive(Debug, Default)]
struct LoggerState {
    /// Lines persisted so far; the next line gets `written + 1`.
    written: u32,
    closed: bool,
}

/// Structured log sink bound to one execution.
///
/// Writes never fail: after close, once the execution has left RUNNING, or
/// past [`MAX_LINES_PER_RUN`] they are dropped. `seq` only advances on a
/// successful insert, so stored lines are numbered `1..=k` without gaps.
/// Accepted lines are mirrored to `tracing`.
pub struct RunLogger {
    store: JobStore,
    execution_id: i64,
    kind: JobKind,
    state: Mutex<LoggerState>,
}

impl RunLogger {
    pub fn new(store: JobStore, execution_id: i64, kind: JobKind) -> Self {
        Self {
            store,
            execution_id,
            kind,
            state: Mutex::new(LoggerState::default()),
        }
    }

    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Lines persisted so far.
    pub async fn lines_written(&self) -> u32 {
        self.state.lock().await.written
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, Value::Null).await;
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, Value::Null).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, Value::Null).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, Value::Null).await;
    }

    /// Write one line with free-form context.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>, context: Value) {
        let message = message.into();
        let mut state = self.state.lock().await;
        if state.closed || state.written >= MAX_LINES_PER_RUN {
            return;
        }
        let seq = state.written + 1;

        let context = match context {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        match self
            .store
            .insert_log_entry(self.execution_id, seq, level, message.clone(), context)
            .await
        {
            Ok(true) => {
                state.written = seq;
                self.mirror(level, seq, &message);
            }
            // Finalized elsewhere; nothing more may be written.
            Ok(false) => state.closed = true,
            Err(e) => warn!(
                execution_id = self.execution_id,
                seq,
                "Dropping run log line: {}", e
            ),
        }
    }

    /// Finalize as SUCCESS. A second close is a no-op returning `false`.
    pub async fn close_success(&self, summary: Option<String>) -> JobResult<bool> {
        let summary = summary.unwrap_or_else(|| DEFAULT_SUCCESS_SUMMARY.to_string());
        self.close(ExecutionStatus::Success, summary, None).await
    }

    /// Finalize as ERROR, keeping the full failure detail.
    pub async fn close_error(
        &self,
        err: &anyhow::Error,
        summary: Option<String>,
    ) -> JobResult<bool> {
        let summary = summary.unwrap_or_else(|| DEFAULT_FAILURE_SUMMARY.to_string());
        let detail = truncate_bytes(&format!("{err:?}"), ERROR_MAX_BYTES);
        self.close(ExecutionStatus::Error, summary, Some(detail)).await
    }

    async fn close(
        &self,
        status: ExecutionStatus,
        summary: String,
        error: Option<String>,
    ) -> JobResult<bool> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(false);
        }

        let finalize = Finalize {
            execution_id: self.execution_id,
            status,
            summary: truncate_chars(&summary, SUMMARY_MAX_CHARS),
            error,
            finished_at: Utc::now(),
        };
        let done = self
            .store
            .connection()
            .call(move |conn| Ok(finalize_execution(conn, &finalize)?))
            .await?;

        // Closed even when someone else finalized first.
        state.closed = true;
        if done {
            info!(
                execution_id = self.execution_id,
                kind = %self.kind,
                status = %status,
                lines = state.written,
                "Execution finished"
            );
        } else {
            debug!(
                execution_id = self.execution_id,
                "Execution already finalized elsewhere"
            );
        }
        Ok(done)
    }

    fn mirror(&self, level: LogLevel, seq: u32, message: &str) {
        let execution_id = self.execution_id;
        let kind = self.kind.as_str();
        match level {
            LogLevel::Debug => debug!(execution_id, kind, seq, "{}", message),
            LogLevel::Info => info!(execution_id, kind, seq, "{}", message),
            LogLevel::Warn => warn!(execution_id, kind, seq, "{}", message),
            LogLevel::Error => error!(execution_id, kind, seq, "{}", message),
        }
    }
}

/// First `max` characters of `s`.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Longest prefix of `s` that fits in `max` bytes on a char boundary.
pub(crate) fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
