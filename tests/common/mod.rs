//! Shared helpers for manager integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use instance_manager::config::ManagerSettings;
use instance_manager::manager::Manager;
use instance_manager::resolve::IdentityKey;
use instance_manager::supervisor::{ProcessRecord, Supervisor};

/// A worker that stays up until signalled.
pub const LONG_RUNNING: &str = "exec sleep 30";
/// A worker that dies immediately.
pub const CRASHING: &str = "exit 1";
/// A worker that ignores SIGTERM.
pub const STUBBORN: &str = "trap '' TERM; while true; do sleep 1; done";
/// A worker that runs for a while, then fails.
pub const FLAPPING: &str = "sleep 1.2; exit 1";

pub fn write_document(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("instances.yaml");
    std::fs::write(&path, contents).unwrap();
    path
}

/// Settings running `script` under `sh -c` with short timings.
pub fn settings(document: &Path, script: &str) -> ManagerSettings {
    let mut settings = ManagerSettings::default();
    settings.manager.document_path = document.display().to_string();
    settings.manager.watch_document = false;
    settings.worker.program = "sh".to_string();
    settings.worker.args = vec!["-c".to_string(), script.to_string()];
    settings.worker.startup_grace_ms = 200;
    settings.worker.stop_timeout_secs = 2;
    settings.restart.max_retries = 2;
    settings.restart.base_delay_ms = 20;
    settings.restart.max_delay_ms = 100;
    settings
}

/// Poll `check` until it returns true or ten seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn record(supervisor: &Supervisor, user: &str) -> Option<ProcessRecord> {
    supervisor.record(&IdentityKey::from(user)).await
}

pub async fn wait_running(supervisor: &Supervisor, user: &str) {
    eventually(&format!("{user} running"), || async {
        record(supervisor, user)
            .await
            .is_some_and(|r| r.state.is_running())
    })
    .await;
}

/// Keep running cycles until `check` holds, or ten seconds pass.
pub async fn cycle_until<F, Fut>(manager: &mut Manager, what: &str, mut check: F)
where
    F: FnMut(Supervisor) -> Fut,
    Fut: Future<Output = bool>,
{
    let supervisor = manager.supervisor().clone();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        let _ = manager.run_cycle().await;
        if check(supervisor.clone()).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {what}");
}
