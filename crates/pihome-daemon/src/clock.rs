//! Wall-clock minute boundaries.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use pihome_jobs::minute_floor;

/// Extra wait past the boundary so the wake lands inside the new minute.
const BOUNDARY_SLACK: Duration = Duration::from_millis(5);

/// Time from `now` to the start of the next wall-clock minute.
///
/// Always positive: exactly on a boundary, the answer is a full minute.
pub fn duration_until_next_minute(now: DateTime<Utc>) -> Duration {
    let next = minute_floor(now) + TimeDelta::minutes(1);
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

/// Emits each wall-clock minute at most once, in increasing order.
///
/// Each wait is recomputed from the wall clock and slept on the monotonic
/// timer, so clock steps during a sleep shift at most one wake and never
/// accumulate.
#[derive(Debug, Default)]
pub struct MinuteClock {
    last: Option<DateTime<Utc>>,
}

impl MinuteClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last minute emitted.
    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.last
    }

    /// Sleep until the next minute that has not been emitted yet.
    pub async fn next_minute(&mut self) -> DateTime<Utc> {
        loop {
            let wait = duration_until_next_minute(Utc::now()) + BOUNDARY_SLACK;
            tokio::time::sleep(wait).await;
            if let Some(minute) = self.accept(Utc::now()) {
                return minute;
            }
        }
    }

    /// Record the minute containing `now` unless it is not newer than the
    /// last one emitted (woke early, or the clock stepped back).
    pub fn accept(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let minute = minute_floor(now);
        if self.last.is_some_and(|last| minute <= last) {
            debug!(%minute, "Minute already emitted, waiting again");
            return None;
        }
        self.last = Some(minute);
        Some(minute)
    }
}
