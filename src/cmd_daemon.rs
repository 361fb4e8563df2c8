//! The `daemon` command.

use std::sync::Arc;

use anyhow::bail;
use tracing::{error, info};

use pihome_config::Config;
use pihome_daemon::Daemon;
use pihome_jobs::{JobStore, Registry};

/// Run the daemon in the foreground until SIGINT/SIGTERM.
pub(crate) async fn run_daemon(
    config: Config,
    store: JobStore,
    registry: Arc<Registry>,
) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        scheduler = config.scheduler.enabled,
        stats = config.stats.enabled,
        discovery = config.discovery.enabled,
        "Starting pihome daemon"
    );

    let failures = Daemon::new(config, store, registry).run().await?;
    if failures.is_empty() {
        info!("pihome daemon exited cleanly");
        return Ok(());
    }
    for failure in &failures {
        error!(task = failure.task, "{}", failure.error);
    }
    bail!("{} daemon task(s) failed", failures.len())
}
