//! CLI definitions for pihome.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// pihome CLI.
#[derive(Parser)]
#[command(name = "pihome")]
#[command(about = "Home dashboard daemon: periodic job scheduling and execution")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config/pihome.toml",
        env = "PIHOME_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler, stats sampler and discovery responder until stopped
    Daemon,

    /// Run one scheduling pass now: enqueue due jobs, claim, run
    #[command(alias = "job_tick")]
    JobTick,

    /// Run a single job kind immediately, bypassing its schedule
    Job {
        /// Job kind (e.g. DUMMY, WEATHER)
        kind: String,

        /// Parameter override; the value is parsed as JSON when possible
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Parameters as a JSON object
        #[arg(long)]
        params_json: Option<String>,

        /// Run on behalf of this catalog job
        #[arg(long)]
        job: Option<String>,
    },

    /// Create or update the recurring job catalog
    Seed,

    /// Show every job and its last run
    Status,

    /// Show one execution and its log lines
    Logs {
        /// Execution ID
        execution_id: i64,
    },
}
