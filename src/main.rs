//! pihome - home dashboard daemon
//!
//! Main entry point for the pihome CLI and daemon.

mod cli;
mod cmd_daemon;
mod cmd_job;
mod register;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pihome_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};
use pihome_jobs::JobStore;

use cli::{Cli, Commands};

/// Initialize tracing: console output plus an optional daily-rolling file.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;

    // Console goes to stderr so command output on stdout stays clean.
    let console_text = (!logging.json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let console_json = logging
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));

    let (file_layer, guard) = match &logging.dir {
        Some(dir) => {
            let dir = ConfigLoader::expand_path(dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&logging.file_prefix)
                .max_log_files(30)
                .build(&dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_text)
        .with(console_json)
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}

/// Open the job database, creating its directory if needed.
async fn open_store(config: &Config) -> anyhow::Result<JobStore> {
    let path = ConfigLoader::expand_path(&config.database.path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let busy_timeout = Duration::from_millis(config.database.busy_timeout_ms);
    let store = JobStore::open(&path, busy_timeout)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    debug!(path = %path.display(), "Job database ready");
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    let _guard = init_tracing(&config.logging)?;

    let warnings = ConfigValidator::validate(&config).into_result()?;
    for warning in warnings {
        warn!(path = %warning.path, "{}", warning.message);
    }

    let store = open_store(&config).await?;
    let registry = Arc::new(register::build_registry()?);

    match cli.command {
        Commands::Daemon => cmd_daemon::run_daemon(config, store, registry).await,
        Commands::JobTick => cmd_job::run_job_tick(&config, store, registry).await,
        Commands::Job {
            kind,
            params,
            params_json,
            job,
        } => {
            cmd_job::run_job(
                store,
                registry,
                &kind,
                &params,
                params_json.as_deref(),
                job.as_deref(),
            )
            .await
        }
        Commands::Seed => cmd_job::run_seed(store, &config.seed).await,
        Commands::Status => cmd_job::run_status(store).await,
        Commands::Logs { execution_id } => cmd_job::run_logs(store, execution_id).await,
    }
}
