//! Claiming QUEUED executions and running them with a panic fallback.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use rusqlite::{TransactionBehavior, params};
use tracing::{debug, error, info, warn};

use pihome_config::SingleRunnerPolicy;

use crate::dispatch::Dispatcher;
use crate::error::JobResult;
use crate::run_logger::truncate_chars;
use crate::store::{JobStore, load_execution};
use crate::timestamp::to_db;
use crate::types::{Execution, ExecutionStatus};

/// Longest failure message written by the fallback path, in characters.
pub const FALLBACK_MESSAGE_MAX_CHARS: usize = 1000;

/// Final state of one claimed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub execution_id: i64,
    pub status: ExecutionStatus,
    /// Set when the fallback finalized the execution.
    pub forced: bool,
}

/// Moves QUEUED executions to RUNNING and runs them in claim order.
///
/// Under [`SingleRunnerPolicy::System`] nothing is claimed while any
/// execution is RUNNING. The check runs inside the claiming transaction.
#[derive(Clone)]
pub struct Claimer {
    store: JobStore,
    dispatcher: Dispatcher,
    policy: SingleRunnerPolicy,
    /// Executions left RUNNING because finalizing them failed, with the
    /// message to record once the database accepts it.
    unsettled: Arc<DashMap<i64, String>>,
}

impl Claimer {
    pub fn new(store: JobStore, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            policy: SingleRunnerPolicy::default(),
            unsettled: Arc::new(DashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: SingleRunnerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> SingleRunnerPolicy {
        self.policy
    }

    /// Claim every QUEUED execution, oldest first, in one transaction.
    ///
    /// `None` when the single-runner gate is closed. A row whose
    /// compare-and-swap affects nothing was claimed by someone else and is
    /// skipped.
    pub async fn claim_queued_batch(&self) -> JobResult<Option<Vec<Execution>>> {
        let now = to_db(Utc::now());
        let gated = self.policy == SingleRunnerPolicy::System;
        let claimed = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if gated && running_exists(&tx)? {
                    return Ok(None);
                }
                let queued: Vec<i64> = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM executions WHERE status = 'QUEUED'
                         ORDER BY created_at, id",
                    )?;
                    stmt.query_map([], |row| row.get(0))?
                        .collect::<Result<Vec<_>, _>>()?
                };

                let mut claimed = Vec::with_capacity(queued.len());
                for id in queued {
                    if swap_to_running(&tx, id, &now)? {
                        if let Some(execution) = load_execution(&tx, id)? {
                            claimed.push(execution);
                        }
                    }
                }
                tx.commit()?;
                Ok(Some(claimed))
            })
            .await?;

        match &claimed {
            Some(batch) if !batch.is_empty() => {
                info!(count = batch.len(), "Claimed queued executions");
            }
            None => debug!("An execution is RUNNING, nothing claimed"),
            _ => {}
        }
        Ok(claimed)
    }

    /// Claim one QUEUED execution. `None` if it was not QUEUED anymore or
    /// the single-runner gate is closed.
    pub async fn claim(&self, execution_id: i64) -> JobResult<Option<Execution>> {
        let now = to_db(Utc::now());
        let gated = self.policy == SingleRunnerPolicy::System;
        let claimed = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if gated && running_exists(&tx)? {
                    return Ok(None);
                }
                if !swap_to_running(&tx, execution_id, &now)? {
                    return Ok(None);
                }
                let execution = load_execution(&tx, execution_id)?;
                tx.commit()?;
                Ok(execution)
            })
            .await?;
        Ok(claimed)
    }

    /// Claim one execution and run it. `None` if it was not claimed.
    pub async fn claim_and_run(&self, execution_id: i64) -> JobResult<Option<RunOutcome>> {
        match self.claim(execution_id).await? {
            Some(execution) => Ok(Some(self.run(&execution).await?)),
            None => Ok(None),
        }
    }

    /// Run claimed executions one after another, in the given order.
    ///
    /// An execution that cannot be finalized is logged and left for
    /// [`Claimer::settle_unsettled`]; the rest of the batch still runs.
    pub async fn run_batch(&self, batch: &[Execution]) -> Vec<RunOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for execution in batch {
            match self.run(execution).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(
                    execution_id = execution.id,
                    "Execution could not be finalized: {}", e
                ),
            }
        }
        outcomes
    }

    /// Dispatch a RUNNING execution. If the dispatch panics or fails
    /// without finalizing, the execution is forced to ERROR here. If that
    /// fails too, the execution is remembered as unsettled.
    pub async fn run(&self, execution: &Execution) -> JobResult<RunOutcome> {
        let result = self.run_guarded(execution).await;
        if let Err(e) = &result {
            let message = format!("execution could not be finalized: {e}");
            self.unsettled.insert(
                execution.id,
                truncate_chars(&message, FALLBACK_MESSAGE_MAX_CHARS),
            );
        }
        result
    }

    /// Retry the ERROR fallback for unsettled executions. Returns how many
    /// are still unsettled afterwards.
    pub async fn settle_unsettled(&self) -> usize {
        let pending: Vec<(i64, String)> = self
            .unsettled
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (execution_id, message) in pending {
            match self.store.force_error(execution_id, message).await {
                Ok(forced) => {
                    self.unsettled.remove(&execution_id);
                    if forced {
                        warn!(execution_id, "Unsettled execution forced to ERROR");
                    }
                }
                Err(e) => warn!(execution_id, "Execution still cannot be finalized: {}", e),
            }
        }
        self.unsettled.len()
    }

    pub fn unsettled_count(&self) -> usize {
        self.unsettled.len()
    }

    async fn run_guarded(&self, execution: &Execution) -> JobResult<RunOutcome> {
        let result = AssertUnwindSafe(self.dispatcher.dispatch(execution))
            .catch_unwind()
            .await;

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("handler panicked: {}", panic_message(&*panic))),
        };

        let mut forced = false;
        if let Some(message) = failure {
            error!(execution_id = execution.id, "Execution escaped dispatch: {}", message);
            let message = truncate_chars(&message, FALLBACK_MESSAGE_MAX_CHARS);
            forced = self.store.force_error(execution.id, message).await?;
            if forced {
                warn!(execution_id = execution.id, "Execution forced to ERROR");
            }
        }

        let status = self
            .store
            .get_execution(execution.id)
            .await?
            .map(|e| e.status)
            .unwrap_or(ExecutionStatus::Error);
        Ok(RunOutcome {
            execution_id: execution.id,
            status,
            forced,
        })
    }
}

fn running_exists(conn: &rusqlite::Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM executions WHERE status = 'RUNNING')",
        [],
        |row| row.get(0),
    )
}

/// Compare-and-swap QUEUED -> RUNNING.
fn swap_to_running(conn: &rusqlite::Connection, id: i64, now: &str) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE executions SET status = 'RUNNING', started_at = ?1
         WHERE id = ?2 AND status = 'QUEUED'",
        params![now, id],
    )?;
    Ok(updated == 1)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
