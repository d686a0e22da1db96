//! End-to-end cycles against real child processes.

#![cfg(unix)]

mod common;

use common::*;
use instance_manager::manager::{Manager, ManagerError};
use instance_manager::reconcile::Action;
use instance_manager::resolve::IdentityKey;
use instance_manager::supervisor::ProcessState;

const TWO_USERS: &str = r#"
defaults:
  live_config_name: matic.json
instances:
  - user: binance_01
    symbols: [ETHUSDT]
  - user: bybit_01
    symbols: [BTCUSDT]
"#;

const ONE_USER: &str = r#"
defaults:
  live_config_name: matic.json
instances:
  - user: binance_01
    symbols: [ETHUSDT]
"#;

fn keys(actions: &[Action]) -> Vec<(&'static str, String)> {
    actions
        .iter()
        .map(|a| (a.name(), a.key().as_str().to_string()))
        .collect()
}

#[tokio::test]
async fn test_converges_and_goes_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), TWO_USERS);
    let mut manager = Manager::new(&settings(&doc, LONG_RUNNING));

    let report = manager.run_cycle().await.unwrap();
    assert_eq!(
        keys(&report.actions),
        vec![("start", "binance_01".to_string()), ("start", "bybit_01".to_string())]
    );
    assert!(report.deferred.is_empty());

    let supervisor = manager.supervisor().clone();
    wait_running(&supervisor, "binance_01").await;
    wait_running(&supervisor, "bybit_01").await;

    let report = manager.run_cycle().await.unwrap();
    assert!(report.actions.is_empty());
    let report = manager.run_cycle().await.unwrap();
    assert!(report.actions.is_empty());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_removed_user_is_stopped_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), TWO_USERS);
    let mut manager = Manager::new(&settings(&doc, LONG_RUNNING));
    let supervisor = manager.supervisor().clone();

    manager.run_cycle().await.unwrap();
    wait_running(&supervisor, "bybit_01").await;
    wait_running(&supervisor, "binance_01").await;

    write_document(dir.path(), ONE_USER);
    let report = manager.run_cycle().await.unwrap();
    assert_eq!(keys(&report.actions), vec![("stop", "bybit_01".to_string())]);

    // While draining, later cycles must not repeat the stop.
    let report = manager.run_cycle().await.unwrap();
    assert!(report.actions.is_empty());

    eventually("bybit_01 removed", || async {
        record(&supervisor, "bybit_01").await.is_none()
    })
    .await;

    let report = manager.run_cycle().await.unwrap();
    assert!(report.actions.is_empty());
    assert!(record(&supervisor, "binance_01").await.unwrap().state.is_running());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_changed_config_restarts_worker() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), ONE_USER);
    let mut manager = Manager::new(&settings(&doc, LONG_RUNNING));
    let supervisor = manager.supervisor().clone();

    manager.run_cycle().await.unwrap();
    wait_running(&supervisor, "binance_01").await;
    let before = record(&supervisor, "binance_01").await.unwrap();

    write_document(dir.path(), &ONE_USER.replace("[ETHUSDT]", "[ETHUSDT, SOLUSDT]"));
    let report = manager.run_cycle().await.unwrap();
    assert_eq!(keys(&report.actions), vec![("restart", "binance_01".to_string())]);

    eventually("binance_01 relaunched", || async {
        record(&supervisor, "binance_01")
            .await
            .is_some_and(|r| r.state.is_running() && r.config_hash != before.config_hash)
    })
    .await;
    let after = record(&supervisor, "binance_01").await.unwrap();
    assert_eq!(after.restart_count, 1);
    assert_ne!(after.pid, before.pid);

    let report = manager.run_cycle().await.unwrap();
    assert!(report.actions.is_empty());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_broken_document_keeps_last_known_good() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), TWO_USERS);
    let mut manager = Manager::new(&settings(&doc, LONG_RUNNING));
    let supervisor = manager.supervisor().clone();

    manager.run_cycle().await.unwrap();
    wait_running(&supervisor, "binance_01").await;

    write_document(dir.path(), "instances: [this is: not: valid");
    let err = manager.run_cycle().await.unwrap_err();
    assert!(matches!(err, ManagerError::Schema(_)));

    assert_eq!(manager.desired_handle().load().len(), 2);
    let status = manager.status_handle().load_full();
    assert_eq!(status.cycles, 2);
    assert!(status.last_error.is_some());
    assert!(record(&supervisor, "binance_01").await.is_some());
    assert!(record(&supervisor, "bybit_01").await.is_some());

    write_document(dir.path(), TWO_USERS);
    let report = manager.run_cycle().await.unwrap();
    assert!(report.actions.is_empty());
    assert!(manager.status_handle().load().last_error.is_none());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_stop_for_starting_worker_is_deferred_then_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), TWO_USERS);
    let mut settings = settings(&doc, LONG_RUNNING);
    settings.worker.startup_grace_ms = 1_500;
    let mut manager = Manager::new(&settings);
    let supervisor = manager.supervisor().clone();

    manager.run_cycle().await.unwrap();

    write_document(dir.path(), ONE_USER);
    let report = manager.run_cycle().await.unwrap();
    assert_eq!(keys(&report.actions), vec![("stop", "bybit_01".to_string())]);
    assert_eq!(report.deferred, vec![IdentityKey::from("bybit_01")]);
    assert_eq!(
        record(&supervisor, "bybit_01").await.unwrap().state,
        ProcessState::Starting
    );

    // Still starting: the stop is issued again and deferred again.
    let report = manager.run_cycle().await.unwrap();
    assert_eq!(keys(&report.actions), vec![("stop", "bybit_01".to_string())]);
    assert_eq!(report.deferred, vec![IdentityKey::from("bybit_01")]);

    cycle_until(&mut manager, "bybit_01 removed", |s| async move {
        record(&s, "bybit_01").await.is_none()
    })
    .await;
    assert!(record(&supervisor, "binance_01").await.is_some());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_deferred_stop_completes_while_document_is_broken() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), TWO_USERS);
    let mut settings = settings(&doc, LONG_RUNNING);
    settings.worker.startup_grace_ms = 1_500;
    let mut manager = Manager::new(&settings);
    let supervisor = manager.supervisor().clone();

    manager.run_cycle().await.unwrap();

    write_document(dir.path(), ONE_USER);
    let report = manager.run_cycle().await.unwrap();
    assert_eq!(report.deferred, vec![IdentityKey::from("bybit_01")]);

    write_document(dir.path(), "instances: [broken");
    assert!(manager.run_cycle().await.is_err());

    cycle_until(&mut manager, "bybit_01 stopped on stale config", |s| async move {
        record(&s, "bybit_01").await.is_none()
    })
    .await;

    assert!(manager.status_handle().load().last_error.is_some());
    assert_eq!(manager.desired_handle().load().len(), 1);
    wait_running(&supervisor, "binance_01").await;

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_broken_document_before_first_good_cycle_starts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), "instances: [broken");
    let mut manager = Manager::new(&settings(&doc, LONG_RUNNING));

    assert!(manager.run_cycle().await.is_err());
    assert!(manager.run_cycle().await.is_err());
    assert!(manager.supervisor().snapshot().await.is_empty());
}

#[tokio::test]
async fn test_worker_ignoring_sigterm_is_killed_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), TWO_USERS);
    let mut settings = settings(&doc, STUBBORN);
    settings.worker.stop_timeout_secs = 1;
    let mut manager = Manager::new(&settings);
    let supervisor = manager.supervisor().clone();

    manager.run_cycle().await.unwrap();
    wait_running(&supervisor, "bybit_01").await;
    let pid = record(&supervisor, "bybit_01").await.unwrap().pid.unwrap();

    write_document(dir.path(), ONE_USER);
    let started = std::time::Instant::now();
    let report = manager.run_cycle().await.unwrap();
    assert_eq!(keys(&report.actions), vec![("stop", "bybit_01".to_string())]);

    // Still there while the stop timeout runs.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert_eq!(
        record(&supervisor, "bybit_01").await.unwrap().state,
        ProcessState::Stopping
    );

    eventually("bybit_01 killed", || async {
        record(&supervisor, "bybit_01").await.is_none()
    })
    .await;
    assert!(started.elapsed() >= std::time::Duration::from_millis(900));
    // SAFETY: signal 0 only probes for existence.
    assert_ne!(unsafe { libc::kill(pid as libc::pid_t, 0) }, 0);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_long_enough_run_resets_failure_streak() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), ONE_USER);
    let mut settings = settings(&doc, FLAPPING);
    settings.restart.reset_after_secs = 1;
    let mut manager = Manager::new(&settings);
    let supervisor = manager.supervisor().clone();

    manager.run_cycle().await.unwrap();

    // Without the reset, max_retries = 2 would park the key at two relaunches.
    eventually("three relaunches", || async {
        record(&supervisor, "binance_01")
            .await
            .is_some_and(|r| r.restart_count >= 3)
    })
    .await;

    let r = record(&supervisor, "binance_01").await.unwrap();
    assert!(!r.exhausted);
    assert_eq!(r.consecutive_failures, 1);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_market_type_conflict_aborts_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(
        dir.path(),
        "defaults:\n  live_config_name: matic.json\ninstances:\n  - user: u\n    symbols: [A]\n  - user: u\n    symbols: [B]\n    market_type: spot\n",
    );
    let mut manager = Manager::new(&settings(&doc, LONG_RUNNING));

    let err = manager.run_cycle().await.unwrap_err();
    assert!(matches!(err, ManagerError::Resolution(_)));
    assert!(manager.supervisor().snapshot().await.is_empty());
}

#[tokio::test]
async fn test_crashing_worker_exhausts_restart_budget() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), ONE_USER);
    let mut manager = Manager::new(&settings(&doc, CRASHING));
    let supervisor = manager.supervisor().clone();

    manager.run_cycle().await.unwrap();

    eventually("restart budget exhausted", || async {
        record(&supervisor, "binance_01").await.is_some_and(|r| {
            r.exhausted && r.last_error.is_some_and(|e| e.contains("restart budget exhausted"))
        })
    })
    .await;

    let parked = record(&supervisor, "binance_01").await.unwrap();
    assert_eq!(parked.state, ProcessState::Failed);
    assert_eq!(parked.consecutive_failures, 3);
    assert_eq!(parked.restart_count, 2);
    assert!(parked.pid.is_none());

    // Same config: nothing to do until the document changes.
    let report = manager.run_cycle().await.unwrap();
    assert!(report.actions.is_empty());

    // Removal still cleans the parked key up.
    write_document(dir.path(), "defaults:\n  live_config_name: matic.json\ninstances:\n  - user: other\n    symbols: [X]\n");
    let report = manager.run_cycle().await.unwrap();
    assert!(report
        .actions
        .iter()
        .any(|a| matches!(a, Action::Stop(key) if key == &IdentityKey::from("binance_01"))));
    eventually("parked key removed", || async {
        record(&supervisor, "binance_01").await.is_none()
    })
    .await;

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_every_worker() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), TWO_USERS);
    let mut manager = Manager::new(&settings(&doc, LONG_RUNNING));
    let supervisor = manager.supervisor().clone();

    manager.run_cycle().await.unwrap();
    wait_running(&supervisor, "binance_01").await;
    wait_running(&supervisor, "bybit_01").await;

    supervisor.shutdown().await;
    assert!(supervisor.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_run_loop_exits_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_document(dir.path(), ONE_USER);
    let manager = Manager::new(&settings(&doc, LONG_RUNNING));
    let supervisor = manager.supervisor().clone();

    let shutdown = instance_manager::Shutdown::new();
    let (_reload_tx, reload_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = tokio::spawn(manager.run(reload_rx, shutdown.subscribe()));

    wait_running(&supervisor, "binance_01").await;
    shutdown.trigger();

    tokio::time::timeout(std::time::Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(supervisor.snapshot().await.is_empty());
}
