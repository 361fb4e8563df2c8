//! Daemon lifecycle tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use pihome_config::Config;
use pihome_daemon::{CancellationToken, Daemon, DaemonError};
use pihome_jobs::{JobStore, Registry};

// ============================================================================
// Test Helpers
// ============================================================================

async fn daemon_with(config: Config) -> Daemon {
    let store = JobStore::open(&config.database.path, Duration::from_secs(5))
        .await
        .unwrap();
    Daemon::new(config, store, Arc::new(Registry::new()))
}

fn config_in(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.database.path = dir.path().join("pihome.db").display().to_string();
    config.discovery.bind = "127.0.0.1".to_string();
    config.discovery.port = 0;
    config
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_daemon_stops_all_tasks_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = daemon_with(config_in(&dir)).await;

    let cancel = CancellationToken::new();
    let task = tokio::spawn(daemon.run_until(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let failures = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");
}

#[tokio::test]
async fn test_daemon_with_everything_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(&dir);
    config.scheduler.enabled = false;
    config.stats.enabled = false;
    config.discovery.enabled = false;
    let daemon = daemon_with(config).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let failures = daemon.run_until(cancel).await.unwrap();
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_task_failure_is_collected_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut config = config_in(&dir);
    config.discovery.port = taken.local_addr().unwrap().port();
    config.stats.enabled = false;
    let daemon = daemon_with(config).await;

    let cancel = CancellationToken::new();
    let task = tokio::spawn(daemon.run_until(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    // The scheduler is still running; only cancellation ends the daemon.
    assert!(!task.is_finished());
    cancel.cancel();

    let failures = task.await.unwrap().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].task, "discovery");
    assert!(matches!(failures[0].error, DaemonError::DiscoveryBind { .. }));
}
