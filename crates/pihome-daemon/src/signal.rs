//! Signal handling for the daemon process.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::DaemonError;

/// Turns OS shutdown signals into cancellation of a shared token.
#[derive(Clone, Default)]
pub struct SignalHandler {
    token: CancellationToken,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. one the caller also cancels.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Token cancelled on shutdown. Every task should watch a clone.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn request_shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Set up OS signal handlers (Unix only).
    #[cfg(unix)]
    pub fn install(&self) -> Result<(), DaemonError> {
        use tokio::signal::unix::{SignalKind, signal};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::interrupt(), "SIGINT"),
        ] {
            let mut stream =
                signal(kind).map_err(|e| DaemonError::SignalSetup(e.to_string()))?;
            let handler = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = handler.token.cancelled() => {}
                    Some(()) = stream.recv() => {
                        info!("Received {}, shutting down", name);
                        handler.request_shutdown();
                    }
                }
            });
        }

        info!("OS signal handlers installed (SIGTERM, SIGINT)");
        Ok(())
    }

    /// Set up OS signal handlers (non-Unix fallback).
    #[cfg(not(unix))]
    pub fn install(&self) -> Result<(), DaemonError> {
        let handler = self.clone();

        // Only Ctrl+C is available on non-Unix
        tokio::spawn(async move {
            tokio::select! {
                _ = handler.token.cancelled() => {}
                Ok(()) = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down");
                    handler.request_shutdown();
                }
            }
        });

        info!("OS signal handlers installed (Ctrl+C only)");
        Ok(())
    }
}
