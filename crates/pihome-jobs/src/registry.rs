//! Handler registry: maps a job kind to its handler and parameter schema.
//!
//! Built once at process start and shared by reference with the engine.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use jsonschema::Validator;
use serde_json::Value;
use tracing::debug;

use crate::error::{JobError, JobResult};
use crate::run_logger::RunLogger;
use crate::types::{JobContext, JobKind};

/// Implements one job kind's actual work.
///
/// Handlers run outside any database transaction. Returning `Ok` means
/// success (the returned text becomes the summary); returning `Err` marks
/// the execution ERROR with the error's full detail.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The kind this handler serves.
    fn kind(&self) -> JobKind;

    /// JSON Schema for the handler's params. `None` accepts anything.
    fn param_schema(&self) -> Option<Value> {
        None
    }

    async fn run(
        &self,
        ctx: &JobContext,
        logger: &RunLogger,
        params: Value,
    ) -> anyhow::Result<Option<String>>;
}

#[derive(Clone)]
struct Registered {
    handler: Arc<dyn JobHandler>,
    schema: Option<Value>,
    validator: Option<Arc<Validator>>,
}

/// Registry of job handlers keyed by kind.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<JobKind, Registered>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its kind, compiling its param schema.
    pub fn register(&self, handler: Arc<dyn JobHandler>) -> JobResult<()> {
        let kind = handler.kind();
        if self.entries.contains_key(&kind) {
            return Err(JobError::AlreadyRegistered(kind));
        }

        let schema = handler.param_schema();
        let validator = schema
            .as_ref()
            .map(|schema| {
                jsonschema::validator_for(schema).map_err(|e| JobError::InvalidSchema {
                    kind,
                    message: e.to_string(),
                })
            })
            .transpose()?
            .map(Arc::new);

        debug!(kind = %kind, has_schema = schema.is_some(), "Registered job handler");
        self.entries.insert(
            kind,
            Registered {
                handler,
                schema,
                validator,
            },
        );
        Ok(())
    }

    /// Look up the handler for a kind.
    pub fn get_handler(&self, kind: JobKind) -> JobResult<Arc<dyn JobHandler>> {
        self.entries
            .get(&kind)
            .map(|entry| entry.handler.clone())
            .ok_or_else(|| JobError::UnknownKind(kind.to_string()))
    }

    pub fn get_param_schema(&self, kind: JobKind) -> Option<Value> {
        self.entries.get(&kind).and_then(|entry| entry.schema.clone())
    }

    /// Check params against the kind's schema.
    pub fn validate_params(&self, kind: JobKind, params: &Value) -> JobResult<()> {
        let validator = self
            .entries
            .get(&kind)
            .map(|entry| entry.validator.clone())
            .ok_or_else(|| JobError::UnknownKind(kind.to_string()))?;
        let Some(validator) = validator else {
            return Ok(());
        };

        let problems: Vec<String> = validator
            .iter_errors(params)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(JobError::InvalidParams {
                kind,
                message: problems.join("; "),
            })
        }
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Registered kinds in catalog order.
    pub fn kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.entries.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
