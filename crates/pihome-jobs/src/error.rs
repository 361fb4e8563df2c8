//! Error types for the job engine.

use thiserror::Error;

use crate::types::JobKind;

/// Errors that can occur in the job engine.
#[derive(Debug, Error)]
pub enum JobError {
    /// Cron expression could not be parsed.
    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },

    /// No handler is registered for the kind.
    #[error("Unknown job kind: {0}")]
    UnknownKind(String),

    /// Parameters do not satisfy the handler's schema.
    #[error("Invalid params for {kind}: {message}")]
    InvalidParams { kind: JobKind, message: String },

    /// Job definition violates a catalog rule.
    #[error("Invalid job definition: {0}")]
    InvalidJob(String),

    /// A handler's parameter schema could not be compiled.
    #[error("Invalid param schema for {kind}: {message}")]
    InvalidSchema { kind: JobKind, message: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(i64),

    /// The job already has a queued or running execution.
    #[error("Job '{0}' already has an active execution")]
    AlreadyActive(String),

    #[error("Handler already registered for {0}")]
    AlreadyRegistered(JobKind),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for JobError {
    fn from(err: rusqlite::Error) -> Self {
        JobError::Database(tokio_rusqlite::Error::Rusqlite(err))
    }
}

impl JobError {
    /// Errors caused by a bad definition rather than the infrastructure.
    ///
    /// These fail a single execution and never abort a tick.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            JobError::InvalidCron { .. }
                | JobError::UnknownKind(_)
                | JobError::InvalidParams { .. }
                | JobError::InvalidJob(_)
                | JobError::InvalidSchema { .. }
        )
    }
}

/// Result type for job engine operations.
pub type JobResult<T> = Result<T, JobError>;
