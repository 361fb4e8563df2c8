//! Configuration schema definitions.

use serde::{Deserialize, Serialize};

mod schema_daemon;

pub use schema_daemon::*;

/// Shared default helper used by submodules.
pub(crate) fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Job catalog used by `seed`. Empty means the built-in catalog.
    #[serde(default)]
    pub seed: Vec<SeedJobConfig>,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file. `~` is expanded.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_db_path() -> String {
    dirs::home_dir()
        .map(|home| home.join(".pihome").join("pihome.db").display().to_string())
        .unwrap_or_else(|| "pihome.db".to_string())
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Zone in which cron expressions are evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleZone {
    #[default]
    Utc,
    /// Host zone. A wall-clock minute repeated at a DST fall-back fires
    /// only in its first occurrence; minutes skipped at spring-forward never fire.
    Local,
}

/// How many executions may be RUNNING at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleRunnerPolicy {
    /// Skip a tick entirely while any execution is RUNNING.
    #[default]
    System,
    /// Only one active execution per job; different jobs may queue up.
    PerJob,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub timezone: ScheduleZone,

    /// Pending ticks buffered between the minute clock and the worker.
    #[serde(default = "default_tick_queue_capacity")]
    pub tick_queue_capacity: usize,

    #[serde(default)]
    pub single_runner: SingleRunnerPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: ScheduleZone::default(),
            tick_queue_capacity: default_tick_queue_capacity(),
            single_runner: SingleRunnerPolicy::default(),
        }
    }
}

fn default_tick_queue_capacity() -> usize {
    1
}

/// A job definition for the `seed` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedJobConfig {
    pub name: String,

    pub kind: String,

    #[serde(default = "default_job_type")]
    pub job_type: String,

    #[serde(default)]
    pub cron: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_params")]
    pub params: serde_json::Value,
}

fn default_job_type() -> String {
    "CRON".to_string()
}

fn default_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
