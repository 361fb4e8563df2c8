//! # pihome DUMMY handler
//!
//! A job that logs, waits, and optionally fails. Used to check the
//! scheduler end to end without touching any external service.
//!
//! Parameters:
//!
//! - `wait_time_ms`: how long to wait, default 0
//! - `message`: included in the first log line
//! - `log_lines`: extra info lines to write
//! - `fail_with`: fail with this message after waiting

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use pihome_jobs::{JobContext, JobHandler, JobKind, LogLevel, RunLogger};

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DummyParams {
    /// Milliseconds to wait before finishing.
    #[serde(default)]
    pub wait_time_ms: u64,

    #[serde(default)]
    pub message: Option<String>,

    /// Extra info lines to write while running.
    #[serde(default)]
    pub log_lines: Option<u32>,

    /// Fail with this message instead of succeeding.
    #[serde(default)]
    pub fail_with: Option<String>,
}

#[derive(Debug, Default)]
pub struct DummyHandler;

impl DummyHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for DummyHandler {
    fn kind(&self) -> JobKind {
        JobKind::Dummy
    }

    fn param_schema(&self) -> Option<Value> {
        match serde_json::to_value(schema_for!(DummyParams)) {
            Ok(schema) => Some(schema),
            Err(e) => {
                warn!("Failed to render DUMMY parameter schema: {}", e);
                None
            }
        }
    }

    async fn run(
        &self,
        ctx: &JobContext,
        logger: &RunLogger,
        params: Value,
    ) -> anyhow::Result<Option<String>> {
        let params: DummyParams =
            serde_json::from_value(params).context("Failed to decode DUMMY parameters")?;

        match &params.message {
            Some(message) => logger.info(format!("Starting dummy job: {message}")).await,
            None => logger.info("Starting dummy job").await,
        }
        logger
            .log(
                LogLevel::Debug,
                "Dummy job parameters",
                json!({
                    "job": ctx.job_name(),
                    "wait_time_ms": params.wait_time_ms,
                }),
            )
            .await;

        for i in 1..=params.log_lines.unwrap_or(0) {
            logger.info(format!("Dummy line {i}")).await;
        }

        if params.wait_time_ms > 0 {
            tokio::time::sleep(Duration::from_millis(params.wait_time_ms)).await;
        }

        if let Some(reason) = params.fail_with {
            anyhow::bail!("{reason}");
        }
        Ok(None)
    }
}
