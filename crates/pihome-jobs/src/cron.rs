//! Cron matching at minute resolution.
//!
//! Accepts classic five-field expressions (`min hour dom month dow`) as well
//! as the six/seven-field form with a leading seconds field. Numeric
//! day-of-week values use classic cron numbering (0 or 7 is Sunday).

use std::str::FromStr;

use chrono::{DateTime, DurationRound, Local, LocalResult, TimeDelta, TimeZone, Utc};
use cron::Schedule;

use pihome_config::ScheduleZone;

use crate::error::{JobError, JobResult};

const DAY_NAMES: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    source: String,
    schedule: Schedule,
}

impl CronExpr {
    pub fn parse(expr: &str) -> JobResult<Self> {
        let normalized = normalize(expr)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| JobError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: expr.to_string(),
            schedule,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the schedule owns the minute bucket starting at `minute`.
    ///
    /// The most recent fire time strictly before `minute + 1m` must equal
    /// `minute` exactly, so each schedule point is due in one bucket only.
    pub fn is_due(&self, minute: DateTime<Utc>, zone: ScheduleZone) -> bool {
        let minute = minute_floor(minute);
        match zone {
            ScheduleZone::Utc => due_in(&self.schedule, minute),
            ScheduleZone::Local => due_in_zone(&self.schedule, minute, &Local),
        }
    }

    /// Next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>, zone: ScheduleZone) -> Option<DateTime<Utc>> {
        match zone {
            ScheduleZone::Utc => self.schedule.after(&after).next(),
            ScheduleZone::Local => self
                .schedule
                .after(&after.with_timezone(&Local))
                .next()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Parse `expr` and test it against `minute`.
pub fn is_due(expr: &str, minute: DateTime<Utc>, zone: ScheduleZone) -> JobResult<bool> {
    Ok(CronExpr::parse(expr)?.is_due(minute, zone))
}

/// Truncate to the start of the minute.
pub fn minute_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}

/// A wall-clock minute repeated by a backward offset change (DST fall-back)
/// is only due in its first occurrence.
fn due_in_zone<Z: TimeZone>(schedule: &Schedule, minute: DateTime<Utc>, zone: &Z) -> bool {
    let local = minute.with_timezone(zone);
    if matches!(
        zone.from_local_datetime(&local.naive_local()),
        LocalResult::Ambiguous(earliest, _) if earliest != local
    ) {
        return false;
    }
    due_in(schedule, local)
}

fn due_in<Z: TimeZone>(schedule: &Schedule, minute: DateTime<Z>) -> bool {
    let window_end = minute.clone() + TimeDelta::minutes(1);
    let mut fires = schedule.after(&(minute.clone() - TimeDelta::seconds(1)));
    match fires.next() {
        Some(first) if first == minute => {}
        _ => return false,
    }
    // A later fire inside the same minute owns the bucket.
    !matches!(fires.next(), Some(next) if next < window_end)
}

/// Rewrite into the seconds-first dialect the `cron` crate parses.
fn normalize(expr: &str) -> JobResult<String> {
    let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 | 7 => {}
        n => {
            return Err(JobError::InvalidCron {
                expr: expr.to_string(),
                message: format!("expected 5, 6 or 7 fields, found {n}"),
            });
        }
    }
    fields[5] = translate_dow(&fields[5]).map_err(|message| JobError::InvalidCron {
        expr: expr.to_string(),
        message,
    })?;
    Ok(fields.join(" "))
}

fn translate_dow(field: &str) -> Result<String, String> {
    let mut parts = Vec::new();
    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (part, None),
        };
        let base = match base.split_once('-') {
            Some((start, end)) => {
                let start = day_name(start)?;
                // 7 closes a range on Sunday, which would wrap past Saturday.
                if end == "7" && start != "Sun" {
                    parts.push(format!("{start}-Sat"));
                    parts.push("Sun".to_string());
                    continue;
                }
                format!("{start}-{}", day_name(end)?)
            }
            None => day_name(base)?.to_string(),
        };
        match step {
            Some(step) => parts.push(format!("{base}/{step}")),
            None => parts.push(base),
        }
    }
    Ok(parts.join(","))
}

fn day_name(token: &str) -> Result<String, String> {
    if !token.chars().all(|c| c.is_ascii_digit()) || token.is_empty() {
        return Ok(token.to_string());
    }
    token
        .parse::<usize>()
        .ok()
        .and_then(|n| DAY_NAMES.get(n))
        .map(|name| name.to_string())
        .ok_or_else(|| format!("day-of-week {token} out of range 0-7"))
}
