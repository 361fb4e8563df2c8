//! Daemon process: spawns the enabled tasks and waits for shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pihome_config::{Config, ConfigLoader};
use pihome_jobs::{JobStore, Registry, SchedulerEngine};

use crate::discovery::DiscoveryResponder;
use crate::error::DaemonError;
use crate::scheduler::Scheduler;
use crate::signal::SignalHandler;
use crate::stats::{SampleStore, StatsSampler};

/// A task that ended with an error.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: &'static str,
    pub error: DaemonError,
}

pub struct Daemon {
    config: Config,
    store: JobStore,
    registry: Arc<Registry>,
}

impl Daemon {
    pub fn new(config: Config, store: JobStore, registry: Arc<Registry>) -> Self {
        Self {
            config,
            store,
            registry,
        }
    }

    /// Run until SIGINT/SIGTERM.
    pub async fn run(self) -> Result<Vec<TaskFailure>, DaemonError> {
        let signals = SignalHandler::new();
        signals.install()?;
        self.run_until(signals.token()).await
    }

    /// Run until `cancel` fires, then wait for every task to stop.
    ///
    /// Task errors do not stop the other tasks; they are logged when they
    /// happen and returned once everything has stopped.
    pub async fn run_until(
        self,
        cancel: CancellationToken,
    ) -> Result<Vec<TaskFailure>, DaemonError> {
        let mut tasks = Vec::new();

        let scheduler = &self.config.scheduler;
        if scheduler.enabled {
            let engine = SchedulerEngine::new(self.store.clone(), self.registry.clone(), scheduler);
            let run = Scheduler::new(Arc::new(engine), scheduler.tick_queue_capacity)
                .run(cancel.clone());
            tasks.push(spawn_task("scheduler", run));
        }

        if self.config.stats.enabled {
            let path = ConfigLoader::expand_path(&self.config.database.path);
            let busy_timeout = Duration::from_millis(self.config.database.busy_timeout_ms);
            let samples_per_minute = self.config.stats.samples_per_minute;
            let cancel = cancel.clone();
            tasks.push(spawn_task("stats", async move {
                let store = SampleStore::open(path, busy_timeout).await?;
                StatsSampler::new(store, samples_per_minute).run(cancel).await
            }));
        }

        if self.config.discovery.enabled {
            let config = self.config.discovery.clone();
            let cancel = cancel.clone();
            tasks.push(spawn_task("discovery", async move {
                DiscoveryResponder::bind(&config).await?.run(cancel).await
            }));
        }

        info!(tasks = tasks.len(), "Daemon running");
        cancel.cancelled().await;
        info!("Shutdown requested, waiting for tasks");

        let mut failures = Vec::new();
        for (task, handle) in tasks {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => failures.push(TaskFailure { task, error }),
                Err(e) => failures.push(TaskFailure {
                    task,
                    error: DaemonError::TaskJoin {
                        task,
                        reason: e.to_string(),
                    },
                }),
            }
        }
        info!(failed = failures.len(), "Daemon stopped");
        Ok(failures)
    }
}

fn spawn_task<F>(
    task: &'static str,
    fut: F,
) -> (&'static str, JoinHandle<Result<(), DaemonError>>)
where
    F: Future<Output = Result<(), DaemonError>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let result = fut.await;
        if let Err(e) = &result {
            error!(task, "Task failed: {}", e);
        }
        result
    });
    (task, handle)
}
