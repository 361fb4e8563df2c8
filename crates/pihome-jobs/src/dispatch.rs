//! Runs one RUNNING execution through its handler.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{JobError, JobResult};
use crate::registry::{JobHandler, Registry};
use crate::run_logger::RunLogger;
use crate::store::JobStore;
use crate::types::{Execution, JobContext};

/// Resolves the handler, validates params, runs it, and finalizes the
/// execution through its [`RunLogger`].
///
/// Unknown kinds, invalid params, and handler failures all end as an
/// ERROR execution. Only infrastructure errors are returned.
#[derive(Clone)]
pub struct Dispatcher {
    store: JobStore,
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(store: JobStore, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn dispatch(&self, execution: &Execution) -> JobResult<()> {
        let logger = RunLogger::new(self.store.clone(), execution.id, execution.kind);

        let handler = match self.resolve(execution) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(execution_id = execution.id, "Execution rejected: {}", e);
                logger.error(e.to_string()).await;
                logger.close_error(&anyhow::Error::new(e), None).await?;
                return Ok(());
            }
        };

        let job = match execution.job_id {
            Some(job_id) => self.store.get_job(job_id).await?,
            None => None,
        };
        let ctx = JobContext {
            execution_id: execution.id,
            kind: execution.kind,
            job,
        };

        debug!(
            execution_id = execution.id,
            kind = %execution.kind,
            job = ctx.job_name().unwrap_or("-"),
            "Running handler"
        );
        match handler.run(&ctx, &logger, execution.params.clone()).await {
            Ok(summary) => {
                logger.close_success(summary).await?;
            }
            Err(e) => {
                logger.error(format!("{e:#}")).await;
                logger.close_error(&e, None).await?;
            }
        }
        Ok(())
    }

    fn resolve(&self, execution: &Execution) -> Result<Arc<dyn JobHandler>, JobError> {
        let handler = self.registry.get_handler(execution.kind)?;
        self.registry
            .validate_params(execution.kind, &execution.params)?;
        Ok(handler)
    }
}
