//! Host statistics sampler.
//!
//! Reads CPU, memory, swap and network counters from `/proc` several times
//! per minute and stores one averaged row per wall-clock minute.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::params;
use tokio::time::Instant;
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pihome_jobs::schema::configure;
use pihome_jobs::timestamp::{from_db, to_db};

use crate::clock::MinuteClock;
use crate::error::DaemonError;

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;

const STATS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS system_samples (
    minute TEXT PRIMARY KEY,
    samples INTEGER NOT NULL,
    cpu_percent REAL NOT NULL,
    mem_total INTEGER NOT NULL,
    mem_used INTEGER NOT NULL,
    mem_available INTEGER NOT NULL,
    swap_total INTEGER,
    swap_used INTEGER,
    rx_bps REAL NOT NULL,
    tx_bps REAL NOT NULL
);
"#;

/// Cumulative CPU jiffies from the aggregate `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    /// `idle + iowait`.
    pub idle: u64,
}

/// Memory figures in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub available: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

impl MemInfo {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }

    pub fn swap_used(&self) -> u64 {
        self.swap_total.saturating_sub(self.swap_free)
    }
}

/// Byte counters summed over every interface except loopback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if fields.len() < 4 {
        return None;
    }
    let iowait = fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        total: fields.iter().sum(),
        idle: fields[3] + iowait,
    })
}

pub fn parse_meminfo(meminfo: &str) -> Option<MemInfo> {
    let mut total = None;
    let mut available = None;
    let mut swap_total = 0;
    let mut swap_free = 0;
    for line in meminfo.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(kib) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok())
        else {
            continue;
        };
        let bytes = kib * 1024;
        match key {
            "MemTotal" => total = Some(bytes),
            "MemAvailable" => available = Some(bytes),
            "SwapTotal" => swap_total = bytes,
            "SwapFree" => swap_free = bytes,
            _ => {}
        }
    }
    Some(MemInfo {
        total: total?,
        available: available?,
        swap_total,
        swap_free,
    })
}

pub fn parse_net_dev(net_dev: &str) -> NetCounters {
    let mut counters = NetCounters::default();
    for line in net_dev.lines().skip(2) {
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let rx = fields.first().and_then(|v| v.parse::<u64>().ok());
        let tx = fields.get(8).and_then(|v| v.parse::<u64>().ok());
        if let (Some(rx), Some(tx)) = (rx, tx) {
            counters.rx_bytes += rx;
            counters.tx_bytes += tx;
        }
    }
    counters
}

/// One reading of all counters.
#[derive(Debug, Clone, Copy)]
pub struct ProcSnapshot {
    pub cpu: CpuTimes,
    pub memory: MemInfo,
    pub net: NetCounters,
    pub at: Instant,
}

impl ProcSnapshot {
    /// Read counters from a procfs mounted at `root`.
    pub async fn read(root: &Path) -> io::Result<Self> {
        let stat = tokio::fs::read_to_string(root.join("stat")).await?;
        let meminfo = tokio::fs::read_to_string(root.join("meminfo")).await?;
        let net_dev = tokio::fs::read_to_string(root.join("net/dev")).await?;

        let cpu = parse_cpu_times(&stat)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed stat"))?;
        let memory = parse_meminfo(&meminfo)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed meminfo"))?;
        Ok(Self {
            cpu,
            memory,
            net: parse_net_dev(&net_dev),
            at: Instant::now(),
        })
    }
}

/// Rates between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub cpu_percent: f64,
    pub memory: MemInfo,
    /// `None` when a counter went backwards (interface reset).
    pub rx_bps: Option<f64>,
    pub tx_bps: Option<f64>,
}

impl Reading {
    pub fn between(prev: &ProcSnapshot, cur: &ProcSnapshot) -> Self {
        let elapsed = cur.at.duration_since(prev.at).as_secs_f64().max(1e-6);
        Self {
            cpu_percent: cpu_percent(&prev.cpu, &cur.cpu),
            memory: cur.memory,
            rx_bps: rate(prev.net.rx_bytes, cur.net.rx_bytes, elapsed),
            tx_bps: rate(prev.net.tx_bytes, cur.net.tx_bytes, elapsed),
        }
    }
}

pub fn cpu_percent(prev: &CpuTimes, cur: &CpuTimes) -> f64 {
    let total = cur.total.saturating_sub(prev.total);
    if total == 0 {
        return 0.0;
    }
    let idle = cur.idle.saturating_sub(prev.idle).min(total);
    (total - idle) as f64 * 100.0 / total as f64
}

fn rate(prev: u64, cur: u64, elapsed_secs: f64) -> Option<f64> {
    cur.checked_sub(prev).map(|delta| delta as f64 / elapsed_secs)
}

/// One stored row: averages over the readings taken during `minute`.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemSample {
    pub minute: DateTime<Utc>,
    pub samples: u32,
    pub cpu_percent: f64,
    pub mem_total: u64,
    pub mem_used: u64,
    pub mem_available: u64,
    /// `None` on hosts without swap.
    pub swap_total: Option<u64>,
    pub swap_used: Option<u64>,
    pub rx_bps: f64,
    pub tx_bps: f64,
}

impl SystemSample {
    /// Average `readings`; `None` when there are none.
    pub fn average(minute: DateTime<Utc>, readings: &[Reading]) -> Option<Self> {
        let first = readings.first()?;
        let n = readings.len() as f64;
        let swap_total = (first.memory.swap_total > 0).then_some(first.memory.swap_total);
        Some(Self {
            minute,
            samples: u32::try_from(readings.len()).unwrap_or(u32::MAX),
            cpu_percent: readings.iter().map(|r| r.cpu_percent).sum::<f64>() / n,
            mem_total: first.memory.total,
            mem_used: mean_u64(readings.iter().map(|r| r.memory.used())),
            mem_available: mean_u64(readings.iter().map(|r| r.memory.available)),
            swap_total,
            swap_used: swap_total
                .map(|_| mean_u64(readings.iter().map(|r| r.memory.swap_used()))),
            rx_bps: mean_f64(readings.iter().filter_map(|r| r.rx_bps)),
            tx_bps: mean_f64(readings.iter().filter_map(|r| r.tx_bps)),
        })
    }
}

fn mean_u64(values: impl Iterator<Item = u64>) -> u64 {
    let (sum, n) = values.fold((0u128, 0u128), |(s, n), v| (s + v as u128, n + 1));
    if n == 0 {
        0
    } else {
        u64::try_from(sum / n).unwrap_or(u64::MAX)
    }
}

fn mean_f64(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Storage for [`SystemSample`] rows, in the job database file.
#[derive(Clone)]
pub struct SampleStore {
    conn: Connection,
}

impl SampleStore {
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, DaemonError> {
        let conn = Connection::open(path.as_ref().to_path_buf()).await?;
        conn.call(move |conn| {
            configure(conn, busy_timeout, true)?;
            conn.execute_batch(STATS_SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn in_memory() -> Result<Self, DaemonError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(STATS_SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Insert `sample`, replacing any row for the same minute.
    pub async fn record(&self, sample: SystemSample) -> Result<(), DaemonError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO system_samples
                     (minute, samples, cpu_percent, mem_total, mem_used, mem_available,
                      swap_total, swap_used, rx_bps, tx_bps)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        to_db(sample.minute),
                        sample.samples,
                        sample.cpu_percent,
                        to_sql_int(sample.mem_total),
                        to_sql_int(sample.mem_used),
                        to_sql_int(sample.mem_available),
                        sample.swap_total.map(to_sql_int),
                        sample.swap_used.map(to_sql_int),
                        sample.rx_bps,
                        sample.tx_bps,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Newest rows first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<SystemSample>, DaemonError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT minute, samples, cpu_percent, mem_total, mem_used, mem_available,
                            swap_total, swap_used, rx_bps, tx_bps
                     FROM system_samples ORDER BY minute DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], |row| {
                        let minute: String = row.get(0)?;
                        Ok(SystemSample {
                            minute: from_db(0, &minute)?,
                            samples: row.get(1)?,
                            cpu_percent: row.get(2)?,
                            mem_total: from_sql_int(row.get(3)?),
                            mem_used: from_sql_int(row.get(4)?),
                            mem_available: from_sql_int(row.get(5)?),
                            swap_total: row.get::<_, Option<i64>>(6)?.map(from_sql_int),
                            swap_used: row.get::<_, Option<i64>>(7)?.map(from_sql_int),
                            rx_bps: row.get(8)?,
                            tx_bps: row.get(9)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

fn to_sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_sql_int(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

/// Samples the host and writes one [`SystemSample`] per minute.
pub struct StatsSampler {
    store: SampleStore,
    samples_per_minute: u32,
    proc_root: PathBuf,
}

impl StatsSampler {
    pub fn new(store: SampleStore, samples_per_minute: u32) -> Self {
        Self {
            store,
            samples_per_minute: samples_per_minute.clamp(1, 60),
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Read counters from somewhere other than `/proc`.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Run until cancelled. Returns at once on hosts without procfs.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
        if let Err(e) = ProcSnapshot::read(&self.proc_root).await {
            info!(
                root = %self.proc_root.display(),
                "Host counters unavailable, stats sampler disabled: {}", e
            );
            return Ok(());
        }
        info!(
            samples_per_minute = self.samples_per_minute,
            "Stats sampler started"
        );

        let mut clock = MinuteClock::new();
        let mut minute = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            minute = clock.next_minute() => minute,
        };
        loop {
            let Some(readings) = self.collect(&cancel).await else {
                break;
            };
            match SystemSample::average(minute, &readings) {
                Some(sample) => {
                    debug!(%minute, cpu = sample.cpu_percent, "Recording system sample");
                    if let Err(e) = self.store.record(sample).await {
                        warn!(%minute, "Failed to store system sample: {}", e);
                    }
                }
                None => warn!(%minute, "No readings collected this minute"),
            }

            // Sampling ends just past the next boundary; continue with that
            // minute directly instead of waiting out a whole one.
            minute = match clock.accept(Utc::now()) {
                Some(next) => next,
                None => tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = clock.next_minute() => next,
                },
            };
        }
        info!("Stats sampler stopped");
        Ok(())
    }

    /// Take `samples_per_minute` readings evenly across one minute on the
    /// monotonic clock. `None` when cancelled.
    pub(crate) async fn collect(&self, cancel: &CancellationToken) -> Option<Vec<Reading>> {
        let step = Duration::from_secs(60) / self.samples_per_minute;
        self.collect_with_step(step, cancel).await
    }

    pub(crate) async fn collect_with_step(
        &self,
        step: Duration,
        cancel: &CancellationToken,
    ) -> Option<Vec<Reading>> {
        let mut readings = Vec::with_capacity(self.samples_per_minute as usize);
        let mut prev = ProcSnapshot::read(&self.proc_root).await.ok();
        let mut target = Instant::now();
        for _ in 0..self.samples_per_minute {
            target += step;
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep_until(target) => {}
            }
            match ProcSnapshot::read(&self.proc_root).await {
                Ok(cur) => {
                    if let Some(prev) = &prev {
                        readings.push(Reading::between(prev, &cur));
                    }
                    prev = Some(cur);
                }
                Err(e) => warn!("Failed to read host counters: {}", e),
            }
        }
        Some(readings)
    }
}
