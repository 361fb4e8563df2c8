//! Idempotent seeding of the recurring job catalog.

use serde_json::json;
use tracing::info;

use pihome_config::SeedJobConfig;

use crate::error::{JobError, JobResult};
use crate::store::{JobStore, UpsertOutcome};
use crate::types::{JobKind, JobSpec, JobType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub created: usize,
    pub updated: usize,
}

/// Built-in catalog used when the config has no `[[seed]]` entries.
pub fn default_catalog() -> Vec<JobSpec> {
    vec![
        JobSpec::cron("classify-new-images", JobKind::Classify, "*/5 * * * *"),
        JobSpec::cron("generate-art-variants", JobKind::Art, "0 0 * * *"),
        JobSpec::cron("dummy-heartbeat", JobKind::Dummy, "* * * * *").with_params(json!({})),
    ]
}

/// Convert `[[seed]]` config entries into job specs.
pub fn catalog_from_config(entries: &[SeedJobConfig]) -> JobResult<Vec<JobSpec>> {
    entries
        .iter()
        .map(|entry| {
            let kind: JobKind = entry
                .kind
                .parse()
                .map_err(|_| JobError::UnknownKind(entry.kind.clone()))?;
            let job_type: JobType = entry
                .job_type
                .parse()
                .map_err(|e| JobError::InvalidJob(format!("{}: {e}", entry.name)))?;
            let spec = JobSpec {
                name: entry.name.clone(),
                kind,
                job_type,
                cron: entry.cron.clone(),
                enabled: entry.enabled,
                params: entry.params.clone(),
            };
            spec.validate()?;
            Ok(spec)
        })
        .collect()
}

/// Upsert `specs` by name in one transaction. Safe to re-run.
pub async fn seed_catalog(store: &JobStore, specs: Vec<JobSpec>) -> JobResult<SeedReport> {
    let outcomes = store.upsert_jobs(specs).await?;
    let created = outcomes
        .iter()
        .filter(|o| **o == UpsertOutcome::Created)
        .count();
    let report = SeedReport {
        created,
        updated: outcomes.len() - created,
    };
    info!(created = report.created, updated = report.updated, "Seeded job catalog");
    Ok(report)
}
