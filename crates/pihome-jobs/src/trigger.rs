//! Run a job kind immediately, bypassing the cron gate.

use serde_json::Value;
use tracing::info;

use crate::claim::{Claimer, RunOutcome};
use crate::dispatch::Dispatcher;
use crate::error::{JobError, JobResult};
use crate::store::JobStore;
use crate::types::{Execution, ExecutionStatus, JobKind};

/// Creates executions directly in RUNNING and runs them to completion.
#[derive(Clone)]
pub struct ManualTrigger {
    store: JobStore,
    dispatcher: Dispatcher,
    claimer: Claimer,
}

impl ManualTrigger {
    pub fn new(store: JobStore, dispatcher: Dispatcher) -> Self {
        let claimer = Claimer::new(store.clone(), dispatcher.clone());
        Self {
            store,
            dispatcher,
            claimer,
        }
    }

    /// Run `kind` now and return the finalized execution.
    ///
    /// With `job_name` the execution belongs to that catalog job: the job's
    /// params are the base that `params` override, the job must not have a
    /// QUEUED/RUNNING execution, and the outcome is mirrored onto it.
    /// Without it the run is ad hoc.
    pub async fn trigger_now(
        &self,
        kind: JobKind,
        params: Value,
        job_name: Option<&str>,
    ) -> JobResult<Execution> {
        if !self.dispatcher.registry().contains(kind) {
            return Err(JobError::UnknownKind(kind.to_string()));
        }

        let (job_id, params) = match job_name {
            Some(name) => {
                let job = self
                    .store
                    .get_job_by_name(name)
                    .await?
                    .ok_or_else(|| JobError::JobNotFound(name.to_string()))?;
                if job.kind != kind {
                    return Err(JobError::InvalidJob(format!(
                        "job '{}' is {}, not {}",
                        job.name, job.kind, kind
                    )));
                }
                (Some(job.id), merge_params(job.params, params))
            }
            None => (None, params),
        };

        let execution = self
            .store
            .create_execution(job_id, kind, ExecutionStatus::Running, params)
            .await?;
        info!(
            execution_id = execution.id,
            kind = %kind,
            job = job_name.unwrap_or("-"),
            "Manual trigger started"
        );

        let RunOutcome { execution_id, .. } = self.claimer.run(&execution).await?;
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or(JobError::ExecutionNotFound(execution_id))
    }
}

/// Overlay `overrides` onto `base` key by key.
pub fn merge_params(base: Value, overrides: Value) -> Value {
    match (base, overrides) {
        (Value::Object(mut base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overrides) => overrides,
    }
}
