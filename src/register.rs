//! Handler registration.

use std::sync::Arc;

use tracing::info;

use pihome_handler_dummy::DummyHandler;
use pihome_jobs::{JobResult, Registry};

/// Registry with every handler built into this binary.
pub(crate) fn build_registry() -> JobResult<Registry> {
    let registry = Registry::new();
    registry.register(Arc::new(DummyHandler::new()))?;

    let kinds: Vec<String> = registry.kinds().iter().map(ToString::to_string).collect();
    info!(kinds = %kinds.join(","), "Registered job handlers");
    Ok(registry)
}
