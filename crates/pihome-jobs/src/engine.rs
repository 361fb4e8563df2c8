//! One scheduling pass: enqueue, single-runner gate, claim, run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use pihome_config::SchedulerConfig;

use crate::claim::{Claimer, RunOutcome};
use crate::cron::minute_floor;
use crate::dispatch::Dispatcher;
use crate::enqueue::{Enqueuer, RejectedJob};
use crate::error::JobResult;
use crate::registry::Registry;
use crate::store::JobStore;
use crate::types::ExecutionStatus;

/// What a tick did.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub minute: DateTime<Utc>,
    pub queued: usize,
    pub rejected: Vec<RejectedJob>,
    /// The tick stopped at the single-runner gate.
    pub skipped_busy: bool,
    pub outcomes: Vec<RunOutcome>,
    /// Executions still RUNNING because finalizing them failed.
    pub unsettled: usize,
}

impl TickReport {
    pub fn succeeded(&self) -> usize {
        self.count(ExecutionStatus::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(ExecutionStatus::Error)
    }

    fn count(&self, status: ExecutionStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Drives the engine once per minute.
#[derive(Clone)]
pub struct SchedulerEngine {
    enqueuer: Enqueuer,
    claimer: Claimer,
}

impl SchedulerEngine {
    pub fn new(store: JobStore, registry: Arc<Registry>, config: &SchedulerConfig) -> Self {
        let dispatcher = Dispatcher::new(store.clone(), registry);
        Self {
            enqueuer: Enqueuer::new(store.clone(), config.timezone),
            claimer: Claimer::new(store, dispatcher).with_policy(config.single_runner),
        }
    }

    pub fn claimer(&self) -> &Claimer {
        &self.claimer
    }

    /// Run one pass for the minute containing `now`.
    ///
    /// Per-execution failures end up in the execution rows; only
    /// infrastructure errors are returned, abandoning the tick. Executions
    /// an earlier tick could not finalize are retried first, so they do not
    /// hold the single-runner gate shut.
    pub async fn tick(&self, now: DateTime<Utc>) -> JobResult<TickReport> {
        let unsettled = self.claimer.settle_unsettled().await;
        let enqueued = self.enqueuer.queue_due_jobs(now).await?;
        let mut report = TickReport {
            minute: minute_floor(now),
            queued: enqueued.queued.len(),
            rejected: enqueued.rejected,
            skipped_busy: false,
            outcomes: Vec::new(),
            unsettled,
        };

        let Some(batch) = self.claimer.claim_queued_batch().await? else {
            debug!(minute = %report.minute, "An execution is RUNNING, skipping claim");
            report.skipped_busy = true;
            return Ok(report);
        };
        report.outcomes = self.claimer.run_batch(&batch).await;
        report.unsettled = self.claimer.unsettled_count();
        if report.unsettled > 0 {
            warn!(
                minute = %report.minute,
                unsettled = report.unsettled,
                "Some executions could not be finalized, retrying next tick"
            );
        }

        if !report.outcomes.is_empty() {
            info!(
                minute = %report.minute,
                ran = report.outcomes.len(),
                succeeded = report.succeeded(),
                failed = report.failed(),
                "Tick complete"
            );
        }
        Ok(report)
    }
}
