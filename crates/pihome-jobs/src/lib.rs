//! # pihome Jobs
//!
//! Periodic job engine: decides which jobs are due, enqueues them once per
//! due minute, claims and runs them under single-runner rules, and keeps a
//! bounded, ordered log per run.
//!
//! All shared state lives in SQLite. Every read-then-write that guards an
//! invariant runs inside an immediate transaction, and every status change
//! is a compare-and-swap on the expected prior status.

pub mod claim;
pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod enqueue;
pub mod error;
pub mod registry;
pub mod run_logger;
pub mod schema;
pub mod seed;
pub mod store;
pub mod timestamp;
pub mod trigger;
pub mod types;

pub use claim::{Claimer, RunOutcome};
pub use cron::{CronExpr, is_due, minute_floor};
pub use dispatch::Dispatcher;
pub use engine::{SchedulerEngine, TickReport};
pub use enqueue::{EnqueueReport, Enqueuer, QueuedExecution, RejectedJob};
pub use error::{JobError, JobResult};
pub use registry::{JobHandler, Registry};
pub use run_logger::{ERROR_MAX_BYTES, MAX_LINES_PER_RUN, RunLogger, SUMMARY_MAX_CHARS};
pub use seed::{SeedReport, catalog_from_config, default_catalog, seed_catalog};
pub use store::{JobStore, UpsertOutcome};
pub use trigger::ManualTrigger;
pub use types::{
    Execution, ExecutionStatus, Job, JobContext, JobKind, JobLogEntry, JobSpec, JobType, LogLevel,
};
