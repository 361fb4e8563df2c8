//! Minute scheduler: a clock-driven producer and a tick worker joined by a
//! bounded channel.
//!
//! The producer never waits on the worker. When the channel is full it
//! drops the tick and the next minute retries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pihome_jobs::SchedulerEngine;

use crate::clock::MinuteClock;
use crate::error::DaemonError;

/// Work performed for each minute tick.
#[async_trait]
pub trait TickHandler: Send + Sync + 'static {
    async fn handle_tick(&self, minute: DateTime<Utc>) -> Result<(), DaemonError>;
}

#[async_trait]
impl TickHandler for SchedulerEngine {
    async fn handle_tick(&self, minute: DateTime<Utc>) -> Result<(), DaemonError> {
        let report = self.tick(minute).await?;
        debug!(
            minute = %report.minute,
            queued = report.queued,
            rejected = report.rejected.len(),
            skipped_busy = report.skipped_busy,
            ran = report.outcomes.len(),
            unsettled = report.unsettled,
            "Tick handled"
        );
        Ok(())
    }
}

/// Runs the producer and the worker until cancelled.
pub struct Scheduler {
    handler: Arc<dyn TickHandler>,
    capacity: usize,
}

impl Scheduler {
    /// `capacity` bounds the ticks waiting for the worker (at least one).
    pub fn new(handler: Arc<dyn TickHandler>, capacity: usize) -> Self {
        Self {
            handler,
            capacity: capacity.max(1),
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        info!(capacity = self.capacity, "Minute scheduler started");
        tokio::join!(
            run_producer(tx, cancel.clone()),
            run_worker(rx, self.handler, cancel),
        );
        info!("Minute scheduler stopped");
        Ok(())
    }
}

/// Hand `minute` to the worker without waiting.
///
/// Returns `false` once the worker is gone.
pub fn offer_tick(tx: &mpsc::Sender<DateTime<Utc>>, minute: DateTime<Utc>) -> bool {
    match tx.try_send(minute) {
        Ok(()) => true,
        Err(TrySendError::Full(minute)) => {
            warn!(%minute, "Tick queue full, dropping tick");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

async fn run_producer(tx: mpsc::Sender<DateTime<Utc>>, cancel: CancellationToken) {
    let mut clock = MinuteClock::new();
    loop {
        let minute = tokio::select! {
            _ = cancel.cancelled() => break,
            minute = clock.next_minute() => minute,
        };
        if !offer_tick(&tx, minute) {
            break;
        }
    }
    debug!("Tick producer exiting");
}

/// Consume ticks until cancelled or the producer hangs up.
///
/// A failed tick is logged and the loop continues; the next minute retries.
/// Cancellation interrupts a tick in progress, which leaves any execution
/// it was running in RUNNING.
pub async fn run_worker(
    mut rx: mpsc::Receiver<DateTime<Utc>>,
    handler: Arc<dyn TickHandler>,
    cancel: CancellationToken,
) {
    loop {
        let minute = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            minute = rx.recv() => match minute {
                Some(minute) => minute,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(%minute, "Shutdown interrupted a tick in progress");
                break;
            }
            result = handler.handle_tick(minute) => {
                if let Err(e) = result {
                    error!(%minute, "Tick abandoned: {}", e);
                }
            }
        }
    }
    debug!("Tick worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<DateTime<Utc>>>,
        fail_first: AtomicUsize,
    }

    impl Recording {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail_first: AtomicUsize::new(fail_first),
            })
        }
    }

    #[async_trait]
    impl TickHandler for Recording {
        async fn handle_tick(&self, minute: DateTime<Utc>) -> Result<(), DaemonError> {
            self.seen.lock().await.push(minute);
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DaemonError::Io(std::io::Error::other("database is locked")));
            }
            Ok(())
        }
    }

    struct Stuck;

    #[async_trait]
    impl TickHandler for Stuck {
        async fn handle_tick(&self, _minute: DateTime<Utc>) -> Result<(), DaemonError> {
            std::future::pending().await
        }
    }

    fn minute(m: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap() + TimeDelta::minutes(m)
    }

    #[tokio::test]
    async fn test_offer_tick_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(offer_tick(&tx, minute(0)));
        assert!(offer_tick(&tx, minute(1)));

        assert_eq!(rx.recv().await, Some(minute(0)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offer_tick_reports_closed_worker() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!offer_tick(&tx, minute(0)));
    }

    #[tokio::test]
    async fn test_worker_runs_ticks_in_order_and_survives_failures() {
        let handler = Recording::new(1);
        let (tx, rx) = mpsc::channel(4);
        for m in 0..3 {
            tx.send(minute(m)).await.unwrap();
        }
        drop(tx);

        run_worker(rx, handler.clone(), CancellationToken::new()).await;

        let seen = handler.seen.lock().await.clone();
        assert_eq!(seen, vec![minute(0), minute(1), minute(2)]);
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let handler = Recording::new(0);
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_worker(rx, handler.clone(), cancel).await;
        assert!(handler.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_tick_in_progress() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(minute(0)).await.unwrap();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_worker(rx, Arc::new(Stuck), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_run_returns_after_cancel() {
        let handler = Recording::new(0);
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(handler, 0);
        assert_eq!(scheduler.capacity, 1);

        let task = tokio::spawn(scheduler.run(cancel.clone()));
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
