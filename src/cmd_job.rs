//! Job commands: job-tick, job, seed, status, logs.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use serde_json::{Map, Value};

use pihome_config::{Config, SeedJobConfig};
use pihome_jobs::{
    Dispatcher, Execution, ExecutionStatus, JobKind, JobStore, ManualTrigger, Registry,
    SchedulerEngine, catalog_from_config, default_catalog, seed_catalog,
};

/// Run one scheduling pass. Job failures do not fail the command.
pub(crate) async fn run_job_tick(
    config: &Config,
    store: JobStore,
    registry: Arc<Registry>,
) -> anyhow::Result<()> {
    let engine = SchedulerEngine::new(store, registry, &config.scheduler);
    let report = engine.tick(Utc::now()).await.context("Scheduling pass failed")?;

    println!("Tick {}", report.minute.format("%Y-%m-%d %H:%M UTC"));
    println!("  queued:   {}", report.queued);
    for rejected in &report.rejected {
        println!("  rejected: {} ({})", rejected.job_name, rejected.reason);
    }
    if report.skipped_busy {
        println!("  skipped:  an execution is already RUNNING");
    } else {
        println!(
            "  ran:      {} ({} succeeded, {} failed)",
            report.outcomes.len(),
            report.succeeded(),
            report.failed()
        );
    }
    if report.unsettled > 0 {
        println!("  unsettled: {} (left RUNNING, retried next tick)", report.unsettled);
    }
    Ok(())
}

/// Trigger `kind` now and print the finished execution.
pub(crate) async fn run_job(
    store: JobStore,
    registry: Arc<Registry>,
    kind: &str,
    pairs: &[String],
    params_json: Option<&str>,
    job: Option<&str>,
) -> anyhow::Result<()> {
    let kind = JobKind::from_str(&kind.to_uppercase())?;
    let params = build_params(params_json, pairs)?;

    let trigger = ManualTrigger::new(store.clone(), Dispatcher::new(store, registry));
    let execution = trigger.trigger_now(kind, params, job).await?;
    print_execution(&execution);

    if execution.status == ExecutionStatus::Error {
        bail!("Execution {} finished with {}", execution.id, execution.status);
    }
    Ok(())
}

/// Upsert the configured catalog, or the built-in one when none is set.
pub(crate) async fn run_seed(store: JobStore, seed: &[SeedJobConfig]) -> anyhow::Result<()> {
    let catalog = if seed.is_empty() {
        default_catalog()
    } else {
        catalog_from_config(seed)?
    };
    let report = seed_catalog(&store, catalog).await?;
    println!(
        "Seeded job catalog: {} created, {} updated",
        report.created, report.updated
    );
    Ok(())
}

pub(crate) async fn run_status(store: JobStore) -> anyhow::Result<()> {
    let jobs = store.list_jobs().await?;
    if jobs.is_empty() {
        println!("No jobs. Run `pihome seed` to create the catalog.");
        return Ok(());
    }

    println!(
        "{:<28} {:<15} {:<7} {:<14} {:<8} {:<8} {}",
        "NAME", "KIND", "TYPE", "CRON", "ENABLED", "LAST", "FINISHED"
    );
    for job in jobs {
        println!(
            "{:<28} {:<15} {:<7} {:<14} {:<8} {:<8} {}",
            job.name,
            job.kind,
            job.job_type,
            job.cron.as_deref().unwrap_or("-"),
            if job.enabled { "yes" } else { "no" },
            job.last_run_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            job.last_run_finished_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
        if let Some(message) = job.last_run_message {
            println!("    {message}");
        }
    }
    Ok(())
}

pub(crate) async fn run_logs(store: JobStore, execution_id: i64) -> anyhow::Result<()> {
    let execution = store
        .get_execution(execution_id)
        .await?
        .with_context(|| format!("Execution {execution_id} not found"))?;
    print_execution(&execution);

    let entries = store.list_log_entries(execution_id).await?;
    println!();
    println!("Log ({} lines):", entries.len());
    for entry in entries {
        let context = match &entry.context {
            Value::Object(map) if map.is_empty() => String::new(),
            other => format!(" {other}"),
        };
        println!(
            "  {:>3} {} {:<5} {}{}",
            entry.seq,
            entry.created_at.format("%H:%M:%S%.3f"),
            entry.level,
            entry.message,
            context
        );
    }
    Ok(())
}

fn print_execution(execution: &Execution) {
    println!("Execution {} [{}] {}", execution.id, execution.kind, execution.status);
    println!("  params:   {}", execution.params);
    if let Some(started) = execution.started_at {
        println!("  started:  {}", started.to_rfc3339());
    }
    if let Some(runtime) = execution.runtime_ms {
        println!("  runtime:  {runtime} ms");
    }
    if let Some(summary) = &execution.summary {
        println!("  summary:  {summary}");
    }
    if let Some(error) = &execution.error {
        println!("  error:    {error}");
    }
}

/// Merge `--params-json` with `--param KEY=VALUE` pairs; pairs win.
pub(crate) fn build_params(params_json: Option<&str>, pairs: &[String]) -> anyhow::Result<Value> {
    let mut params = match params_json {
        Some(raw) => match serde_json::from_str::<Value>(raw)
            .context("--params-json is not valid JSON")?
        {
            Value::Object(map) => map,
            _ => bail!("--params-json must be a JSON object"),
        },
        None => Map::new(),
    };

    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("--param expects KEY=VALUE, got '{pair}'"))?;
        if key.is_empty() {
            bail!("--param has an empty key: '{pair}'");
        }
        let value =
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(Value::Object(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_params_empty() {
        assert_eq!(build_params(None, &[]).unwrap(), json!({}));
    }

    #[test]
    fn test_build_params_typed_values() {
        let params = build_params(
            None,
            &pairs(&["wait_time_ms=10", "message=hello world", "flag=true", "list=[1,2]"]),
        )
        .unwrap();
        assert_eq!(
            params,
            json!({
                "wait_time_ms": 10,
                "message": "hello world",
                "flag": true,
                "list": [1, 2]
            })
        );
    }

    #[test]
    fn test_pairs_override_json() {
        let params = build_params(
            Some(r#"{"wait_time_ms": 5, "message": "from json"}"#),
            &pairs(&["wait_time_ms=50"]),
        )
        .unwrap();
        assert_eq!(params, json!({"wait_time_ms": 50, "message": "from json"}));
    }

    #[test]
    fn test_value_with_equals_sign() {
        let params = build_params(None, &pairs(&["query=a=b"])).unwrap();
        assert_eq!(params, json!({"query": "a=b"}));
    }

    #[test]
    fn test_build_params_errors() {
        assert!(build_params(Some("not json"), &[]).is_err());
        assert!(build_params(Some("[1, 2]"), &[]).is_err());
        assert!(build_params(None, &pairs(&["novalue"])).is_err());
        assert!(build_params(None, &pairs(&["=5"])).is_err());
    }

    #[tokio::test]
    async fn test_seed_then_status_and_job() {
        let store = JobStore::in_memory().await.unwrap();
        run_seed(store.clone(), &[]).await.unwrap();
        assert_eq!(store.list_jobs().await.unwrap().len(), default_catalog().len());
        run_status(store.clone()).await.unwrap();

        let registry = Arc::new(crate::register::build_registry().unwrap());
        run_job(store.clone(), registry.clone(), "dummy", &[], None, None)
            .await
            .unwrap();
        let failed = run_job(
            store.clone(),
            registry,
            "DUMMY",
            &pairs(&["fail_with=boom"]),
            None,
            None,
        )
        .await;
        assert!(failed.is_err());

        let latest = store.list_executions(None, 1).await.unwrap().remove(0);
        run_logs(store.clone(), latest.id).await.unwrap();
        assert!(run_logs(store, 9999).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_kind_is_an_error() {
        let store = JobStore::in_memory().await.unwrap();
        let registry = Arc::new(crate::register::build_registry().unwrap());
        assert!(run_job(store.clone(), registry.clone(), "SPACESHIP", &[], None, None)
            .await
            .is_err());
        // A catalog kind with no handler in this binary.
        assert!(run_job(store, registry, "WEATHER", &[], None, None).await.is_err());
    }
}
