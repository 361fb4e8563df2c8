use super::*;
use chrono::TimeZone;

const STAT: &str = "cpu  4705 356 584 3699 23 23 0 0 0 0
cpu0 2000 100 300 1800 10 10 0 0 0 0
intr 114930548 113199788 3 0 5 263 0 4 [... lots more numbers ...]
";

const MEMINFO: &str = "MemTotal:        1000000 kB
MemFree:          200000 kB
MemAvailable:     600000 kB
Buffers:           10000 kB
SwapTotal:        512000 kB
SwapFree:         256000 kB
";

const NET_DEV: &str = "Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 9999999     100    0    0    0     0          0         0  9999999     100    0    0    0     0       0          0
  eth0: 1000        10    0    0    0     0          0         0     2000      20    0    0    0     0       0          0
 wlan0:  500         5    0    0    0     0          0         0      700       7    0    0    0     0       0          0
";

fn write_proc(root: &Path) {
    std::fs::create_dir_all(root.join("net")).unwrap();
    std::fs::write(root.join("stat"), STAT).unwrap();
    std::fs::write(root.join("meminfo"), MEMINFO).unwrap();
    std::fs::write(root.join("net/dev"), NET_DEV).unwrap();
}

fn minute() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
}

fn reading(cpu: f64, used: u64, rx: Option<f64>) -> Reading {
    Reading {
        cpu_percent: cpu,
        memory: MemInfo {
            total: 1000,
            available: 1000 - used,
            swap_total: 0,
            swap_free: 0,
        },
        rx_bps: rx,
        tx_bps: Some(10.0),
    }
}

#[test]
fn test_parse_cpu_times() {
    let cpu = parse_cpu_times(STAT).unwrap();
    assert_eq!(cpu.total, 4705 + 356 + 584 + 3699 + 23 + 23);
    assert_eq!(cpu.idle, 3699 + 23);
    assert!(parse_cpu_times("intr 1 2 3").is_none());
}

#[test]
fn test_parse_meminfo_in_bytes() {
    let mem = parse_meminfo(MEMINFO).unwrap();
    assert_eq!(mem.total, 1_000_000 * 1024);
    assert_eq!(mem.available, 600_000 * 1024);
    assert_eq!(mem.used(), 400_000 * 1024);
    assert_eq!(mem.swap_used(), 256_000 * 1024);
    assert!(parse_meminfo("SwapTotal: 0 kB\n").is_none());
}

#[test]
fn test_parse_net_dev_skips_loopback() {
    let net = parse_net_dev(NET_DEV);
    assert_eq!(net.rx_bytes, 1500);
    assert_eq!(net.tx_bytes, 2700);
}

#[test]
fn test_cpu_percent() {
    let prev = CpuTimes { total: 1000, idle: 800 };
    let cur = CpuTimes { total: 1100, idle: 825 };
    assert!((cpu_percent(&prev, &cur) - 75.0).abs() < 1e-9);
    assert_eq!(cpu_percent(&prev, &prev), 0.0);
}

#[test]
fn test_average_of_readings() {
    let readings = vec![
        reading(10.0, 100, Some(100.0)),
        reading(30.0, 300, None),
        reading(20.0, 200, Some(300.0)),
    ];
    let sample = SystemSample::average(minute(), &readings).unwrap();
    assert_eq!(sample.samples, 3);
    assert!((sample.cpu_percent - 20.0).abs() < 1e-9);
    assert_eq!(sample.mem_used, 200);
    assert_eq!(sample.mem_total, 1000);
    // The reset reading is left out of the rate average.
    assert!((sample.rx_bps - 200.0).abs() < 1e-9);
    assert!((sample.tx_bps - 10.0).abs() < 1e-9);
    assert_eq!(sample.swap_total, None);
    assert_eq!(sample.swap_used, None);

    assert!(SystemSample::average(minute(), &[]).is_none());
}

#[tokio::test]
async fn test_snapshot_reads_fake_procfs() {
    let dir = tempfile::tempdir().unwrap();
    write_proc(dir.path());

    let snapshot = ProcSnapshot::read(dir.path()).await.unwrap();
    assert_eq!(snapshot.net.rx_bytes, 1500);
    assert_eq!(snapshot.memory.total, 1_000_000 * 1024);
}

#[tokio::test]
async fn test_sample_store_record_and_replace() {
    let store = SampleStore::in_memory().await.unwrap();
    let readings = vec![reading(50.0, 500, Some(1.0))];
    let mut sample = SystemSample::average(minute(), &readings).unwrap();
    store.record(sample.clone()).await.unwrap();

    sample.cpu_percent = 60.0;
    store.record(sample.clone()).await.unwrap();

    let rows = store.recent(10).await.unwrap();
    assert_eq!(rows, vec![sample]);
}

#[tokio::test]
async fn test_collect_takes_one_reading_per_step() {
    let dir = tempfile::tempdir().unwrap();
    write_proc(dir.path());
    let sampler = StatsSampler::new(SampleStore::in_memory().await.unwrap(), 3)
        .with_proc_root(dir.path());

    let readings = sampler
        .collect_with_step(Duration::from_millis(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(readings.len(), 3);
    assert!(readings.iter().all(|r| r.rx_bps == Some(0.0)));
}

#[tokio::test]
async fn test_collect_stops_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    write_proc(dir.path());
    let sampler = StatsSampler::new(SampleStore::in_memory().await.unwrap(), 3)
        .with_proc_root(dir.path());

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(sampler.collect(&cancel).await.is_none());
}

#[tokio::test]
async fn test_sampler_without_procfs_returns() {
    let sampler = StatsSampler::new(SampleStore::in_memory().await.unwrap(), 60)
        .with_proc_root("/nonexistent/proc");

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        sampler.run(CancellationToken::new()),
    )
    .await
    .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_samples_per_minute_is_clamped() {
    let store = SampleStore::in_memory().await.unwrap();
    assert_eq!(StatsSampler::new(store.clone(), 0).samples_per_minute, 1);
    assert_eq!(StatsSampler::new(store, 600).samples_per_minute, 60);
}
