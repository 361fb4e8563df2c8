//! Daemon-related errors.

use thiserror::Error;

use pihome_jobs::JobError;

/// Errors that can occur while running daemon tasks.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Failed to set up signal handlers.
    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),

    /// Failed to bind the discovery socket.
    #[error("Failed to bind discovery socket on {addr}: {reason}")]
    DiscoveryBind { addr: String, reason: String },

    /// A scheduling pass failed at the infrastructure level.
    #[error("Tick failed: {0}")]
    Tick(#[from] JobError),

    /// Statistics database error.
    #[error("Stats database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A spawned task panicked or was aborted.
    #[error("Task {task} did not finish cleanly: {reason}")]
    TaskJoin { task: &'static str, reason: String },
}
