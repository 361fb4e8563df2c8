//! Core types: jobs, executions, and log entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cron::CronExpr;
use crate::error::{JobError, JobResult};

/// A stored enum value did not match any known variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown {what} '{value}'")]
pub struct ParseEnumError {
    what: &'static str,
    value: String,
}

/// Defines a string-backed enum with `as_str`, `Display`, and `FromStr`.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        what: $what,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Selects the handler that runs a job.
    JobKind, "job kind" {
        Calendar => "CALENDAR",
        Rss => "RSS",
        Weather => "WEATHER",
        Push => "PUSH",
        Art => "ART",
        Newspaper => "NEWSPAPER",
        Classify => "CLASSIFY",
        ManualTrigger => "MANUAL_TRIGGER",
        Dashboard => "DASHBOARD",
        Dummy => "DUMMY",
    }
}

string_enum! {
    /// How a job is started.
    JobType, "job type" {
        /// Fires on its cron schedule.
        Cron => "CRON",
        /// Only ever started by hand; never matched by the cron sweep.
        Manual => "MANUAL",
    }
}

string_enum! {
    /// Execution state. QUEUED -> RUNNING -> {SUCCESS, ERROR}.
    ExecutionStatus, "execution status" {
        Queued => "QUEUED",
        Running => "RUNNING",
        Success => "SUCCESS",
        Error => "ERROR",
        /// Reserved; never produced by the claim/run path.
        Skipped => "SKIPPED",
    }
}

string_enum! {
    /// Level of a run log line.
    LogLevel, "log level" {
        Debug => "DEBUG",
        Info => "INFO",
        Warn => "WARN",
        Error => "ERROR",
    }
}

impl ExecutionStatus {
    /// QUEUED or RUNNING.
    pub fn is_active(&self) -> bool {
        matches!(self, ExecutionStatus::Queued | ExecutionStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Error | ExecutionStatus::Skipped
        )
    }
}

/// A recurring task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub kind: JobKind,
    pub job_type: JobType,
    pub cron: Option<String>,
    pub enabled: bool,
    pub params: Value,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_finished_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<ExecutionStatus>,
    pub last_run_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The writable part of a [`Job`], used for inserts and upserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub kind: JobKind,
    pub job_type: JobType,
    pub cron: Option<String>,
    pub enabled: bool,
    pub params: Value,
}

impl JobSpec {
    /// An enabled CRON job with empty params.
    pub fn cron(name: impl Into<String>, kind: JobKind, expr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            job_type: JobType::Cron,
            cron: Some(expr.into()),
            enabled: true,
            params: Value::Object(Default::default()),
        }
    }

    /// An enabled MANUAL job with empty params.
    pub fn manual(name: impl Into<String>, kind: JobKind) -> Self {
        Self {
            name: name.into(),
            kind,
            job_type: JobType::Manual,
            cron: None,
            enabled: true,
            params: Value::Object(Default::default()),
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check catalog rules: non-empty name, object params, and a
    /// parseable cron present exactly when the job type is CRON.
    pub fn validate(&self) -> JobResult<()> {
        if self.name.trim().is_empty() {
            return Err(JobError::InvalidJob("job name cannot be empty".to_string()));
        }
        if !self.params.is_object() {
            return Err(JobError::InvalidJob(format!(
                "params for '{}' must be an object",
                self.name
            )));
        }
        match (self.job_type, &self.cron) {
            (JobType::Cron, Some(expr)) => {
                CronExpr::parse(expr)?;
            }
            (JobType::Cron, None) => {
                return Err(JobError::InvalidJob(format!(
                    "CRON job '{}' requires a cron expression",
                    self.name
                )));
            }
            (JobType::Manual, Some(_)) => {
                return Err(JobError::InvalidJob(format!(
                    "MANUAL job '{}' must not have a cron expression",
                    self.name
                )));
            }
            (JobType::Manual, None) => {}
        }
        Ok(())
    }
}

/// One attempt to run a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    /// `None` for ad hoc runs outside the catalog.
    pub job_id: Option<i64>,
    /// Kind snapshot taken when the execution was created.
    pub kind: JobKind,
    pub status: ExecutionStatus,
    pub params: Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub runtime_ms: Option<i64>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// One persisted run log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub id: i64,
    pub execution_id: i64,
    pub seq: u32,
    pub level: LogLevel,
    pub message: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

/// What a handler gets to know about the run it is serving.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub execution_id: i64,
    pub kind: JobKind,
    /// The catalog job, absent for ad hoc runs.
    pub job: Option<Job>,
}

impl JobContext {
    pub fn job_name(&self) -> Option<&str> {
        self.job.as_ref().map(|job| job.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip_strings() {
        for kind in JobKind::ALL {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), *kind);
        }
        assert_eq!(JobKind::ManualTrigger.to_string(), "MANUAL_TRIGGER");
        assert!("dummy".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_kind_serde_matches_display() {
        let json = serde_json::to_string(&JobKind::ManualTrigger).unwrap();
        assert_eq!(json, "\"MANUAL_TRIGGER\"");
        let status: ExecutionStatus = serde_json::from_str("\"SKIPPED\"").unwrap();
        assert_eq!(status, ExecutionStatus::Skipped);
    }

    #[test]
    fn test_status_classes() {
        assert!(ExecutionStatus::Queued.is_active());
        assert!(ExecutionStatus::Running.is_active());
        assert!(!ExecutionStatus::Success.is_active());
        assert!(ExecutionStatus::Error.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn test_spec_validation() {
        assert!(JobSpec::cron("a", JobKind::Dummy, "* * * * *").validate().is_ok());
        assert!(JobSpec::manual("b", JobKind::Dummy).validate().is_ok());

        let mut spec = JobSpec::cron("c", JobKind::Dummy, "* * * * *");
        spec.cron = None;
        assert!(matches!(spec.validate(), Err(JobError::InvalidJob(_))));

        let mut spec = JobSpec::manual("d", JobKind::Dummy);
        spec.cron = Some("* * * * *".to_string());
        assert!(matches!(spec.validate(), Err(JobError::InvalidJob(_))));

        let spec = JobSpec::cron("e", JobKind::Dummy, "not a cron");
        assert!(matches!(spec.validate(), Err(JobError::InvalidCron { .. })));

        let spec = JobSpec::manual("f", JobKind::Dummy).with_params(serde_json::json!([1]));
        assert!(matches!(spec.validate(), Err(JobError::InvalidJob(_))));

        let spec = JobSpec::manual("  ", JobKind::Dummy);
        assert!(spec.validate().is_err());
    }
}
