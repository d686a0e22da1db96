//! Process records kept by the supervisor.

use std::time::SystemTime;

use serde::Serialize;

use crate::resolve::IdentityKey;

/// Lifecycle of one worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ProcessState {
    /// An action is in flight; new actions for the key must wait.
    pub fn is_busy(&self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Stopping)
    }

    pub fn is_running(&self) -> bool {
        *self == ProcessState::Running
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
            ProcessState::Failed => "failed",
        }
    }
}

/// Snapshot of one supervised worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub identity_key: IdentityKey,
    /// OS process id of the current child, if one is alive.
    pub pid: Option<u32>,
    pub state: ProcessState,
    pub last_start_time: Option<SystemTime>,
    /// Relaunches of this key: config restarts and failure retries.
    pub restart_count: u32,
    pub consecutive_failures: u32,
    /// Restart budget spent; the key waits for a config change or removal.
    pub exhausted: bool,
    /// Content hash of the config the current child was launched with.
    pub config_hash: u64,
    pub last_error: Option<String>,
}

impl ProcessRecord {
    pub fn new(identity_key: IdentityKey, config_hash: u64) -> Self {
        Self {
            identity_key,
            pid: None,
            state: ProcessState::Starting,
            last_start_time: None,
            restart_count: 0,
            consecutive_failures: 0,
            exhausted: false,
            config_hash,
            last_error: None,
        }
    }
}
