//! Once-per-minute sweep that queues due CRON jobs.

use chrono::{DateTime, Utc};
use rusqlite::TransactionBehavior;
use tracing::{info, warn};

use pihome_config::ScheduleZone;

use crate::cron::{CronExpr, minute_floor};
use crate::error::JobResult;
use crate::store::{JobStore, has_active_execution, insert_execution};
use crate::timestamp::to_db;
use crate::types::{ExecutionStatus, JobKind};

/// A QUEUED execution created by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedExecution {
    pub execution_id: i64,
    pub job_id: i64,
    pub job_name: String,
}

/// A job whose stored cron expression could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedJob {
    pub job_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueReport {
    pub minute: Option<DateTime<Utc>>,
    pub queued: Vec<QueuedExecution>,
    pub rejected: Vec<RejectedJob>,
}

/// Creates QUEUED executions for CRON jobs due in the current minute.
#[derive(Clone)]
pub struct Enqueuer {
    store: JobStore,
    zone: ScheduleZone,
}

impl Enqueuer {
    pub fn new(store: JobStore, zone: ScheduleZone) -> Self {
        Self { store, zone }
    }

    /// Queue every due job for the minute containing `now`.
    ///
    /// Runs in one immediate transaction, which holds the write lock from
    /// candidate selection to insert. Each candidate is re-checked for
    /// due-ness and for an existing QUEUED/RUNNING execution before a row
    /// is inserted, so concurrent sweeps create at most one execution per
    /// job per minute.
    pub async fn queue_due_jobs(&self, now: DateTime<Utc>) -> JobResult<EnqueueReport> {
        let minute = minute_floor(now);
        let zone = self.zone;
        let minute_text = to_db(minute);

        let mut report = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let candidates: Vec<(i64, String, String, String, String)> = {
                    let mut stmt = tx.prepare(
                        "SELECT id, name, kind, cron, params FROM jobs
                         WHERE job_type = 'CRON' AND enabled = 1 AND cron IS NOT NULL
                           AND (last_run_finished_at IS NULL OR last_run_finished_at < ?1)
                         ORDER BY id",
                    )?;
                    stmt.query_map([&minute_text], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?
                };

                let mut report = EnqueueReport::default();
                for (job_id, name, kind, cron, params) in candidates {
                    let expr = match CronExpr::parse(&cron) {
                        Ok(expr) => expr,
                        Err(e) => {
                            report.rejected.push(RejectedJob {
                                job_name: name,
                                reason: e.to_string(),
                            });
                            continue;
                        }
                    };
                    let kind: JobKind = match kind.parse() {
                        Ok(kind) => kind,
                        Err(e) => {
                            report.rejected.push(RejectedJob {
                                job_name: name,
                                reason: e.to_string(),
                            });
                            continue;
                        }
                    };
                    if !expr.is_due(minute, zone) || has_active_execution(&tx, job_id)? {
                        continue;
                    }
                    let execution_id = insert_execution(
                        &tx,
                        Some(job_id),
                        kind,
                        ExecutionStatus::Queued,
                        &params,
                        now,
                    )?;
                    report.queued.push(QueuedExecution {
                        execution_id,
                        job_id,
                        job_name: name,
                    });
                }
                tx.commit()?;
                Ok(report)
            })
            .await?;

        report.minute = Some(minute);
        for rejected in &report.rejected {
            warn!(
                job = %rejected.job_name,
                "Skipping job with unusable definition: {}", rejected.reason
            );
        }
        for queued in &report.queued {
            info!(
                job = %queued.job_name,
                execution_id = queued.execution_id,
                "Queued due job"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    use crate::types::JobSpec;

    fn minute(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, h, m, 0).unwrap()
    }

    async fn setup() -> (JobStore, Enqueuer) {
        let store = JobStore::in_memory().await.unwrap();
        let enqueuer = Enqueuer::new(store.clone(), ScheduleZone::Utc);
        (store, enqueuer)
    }

    #[tokio::test]
    async fn test_queues_due_job_with_params_snapshot() {
        let (store, enqueuer) = setup().await;
        let (job, _) = store
            .upsert_job(
                JobSpec::cron("heartbeat", JobKind::Dummy, "* * * * *")
                    .with_params(json!({"wait_time_ms": 0})),
            )
            .await
            .unwrap();

        let report = enqueuer
            .queue_due_jobs(minute(10, 0) + TimeDelta::seconds(3))
            .await
            .unwrap();
        assert_eq!(report.minute, Some(minute(10, 0)));
        assert_eq!(report.queued.len(), 1);
        assert_eq!(report.queued[0].job_id, job.id);

        let execution = store
            .get_execution(report.queued[0].execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Queued);
        assert_eq!(execution.params, json!({"wait_time_ms": 0}));
        assert_eq!(execution.kind, JobKind::Dummy);
        assert!(execution.started_at.is_none());
    }

    #[tokio::test]
    async fn test_second_sweep_same_minute_is_noop() {
        let (store, enqueuer) = setup().await;
        store
            .upsert_job(JobSpec::cron("heartbeat", JobKind::Dummy, "* * * * *"))
            .await
            .unwrap();

        assert_eq!(enqueuer.queue_due_jobs(minute(10, 0)).await.unwrap().queued.len(), 1);
        assert!(enqueuer.queue_due_jobs(minute(10, 0)).await.unwrap().queued.is_empty());
        // Still QUEUED, so the next minute does not stack another.
        assert!(enqueuer.queue_due_jobs(minute(10, 1)).await.unwrap().queued.is_empty());
        assert_eq!(store.list_executions(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skips_disabled_manual_and_not_due() {
        let (store, enqueuer) = setup().await;
        store
            .upsert_jobs(vec![
                JobSpec::cron("off", JobKind::Dummy, "* * * * *").with_enabled(false),
                JobSpec::manual("by-hand", JobKind::Dummy),
                JobSpec::cron("nightly", JobKind::Art, "0 0 * * *"),
                JobSpec::cron("five", JobKind::Classify, "*/5 * * * *"),
            ])
            .await
            .unwrap();

        let report = enqueuer.queue_due_jobs(minute(10, 5)).await.unwrap();
        let names: Vec<_> = report.queued.iter().map(|q| q.job_name.as_str()).collect();
        assert_eq!(names, vec!["five"]);
        assert!(report.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_finished_within_minute_is_not_requeued() {
        let (store, enqueuer) = setup().await;
        let (job, _) = store
            .upsert_job(JobSpec::cron("quick", JobKind::Dummy, "* * * * *"))
            .await
            .unwrap();

        let report = enqueuer.queue_due_jobs(minute(10, 0)).await.unwrap();
        let execution_id = report.queued[0].execution_id;
        store
            .connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE executions SET status = 'RUNNING', started_at = ?1 WHERE id = ?2",
                    rusqlite::params![to_db(Utc::now()), execution_id],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        store.force_error(execution_id, "done".to_string()).await.unwrap();

        // Pretend the run finished inside minute 10:00.
        let finished = to_db(minute(10, 0) + TimeDelta::seconds(30));
        let job_id = job.id;
        store
            .connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE jobs SET last_run_finished_at = ?1 WHERE id = ?2",
                    rusqlite::params![finished, job_id],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(enqueuer.queue_due_jobs(minute(10, 0)).await.unwrap().queued.is_empty());
        assert_eq!(enqueuer.queue_due_jobs(minute(10, 1)).await.unwrap().queued.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_cron_is_reported_not_queued() {
        let (store, enqueuer) = setup().await;
        // Bypass upsert validation to simulate a hand-edited row.
        store
            .connection()
            .call(|conn| {
                conn.execute(
                    "INSERT INTO jobs (name, kind, job_type, cron, created_at, updated_at)
                     VALUES ('broken', 'DUMMY', 'CRON', 'every minute', 'x', 'x')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        store
            .upsert_job(JobSpec::cron("fine", JobKind::Dummy, "* * * * *"))
            .await
            .unwrap();

        let report = enqueuer.queue_due_jobs(minute(10, 0)).await.unwrap();
        assert_eq!(report.queued.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].job_name, "broken");
        assert!(report.rejected[0].reason.contains("every minute"));
    }
}
