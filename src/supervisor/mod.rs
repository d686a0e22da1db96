//! Worker supervision subsystem.
//!
//! # Data Flow
//! ```text
//! Vec<Action> from the reconciler
//!     → core.rs (Supervisor: one mutex over the process table)
//!     → worker.rs (spawn child, SIGTERM / kill)
//!     → record.rs (ProcessRecord snapshots for the next cycle)
//! ```
//!
//! # Design Decisions
//! - Each worker has one monitor task that owns its Child; everything else sends commands
//! - A key in `starting` or `stopping` is busy; new actions for it are deferred
//! - Failures are isolated per key and never take the manager down
//! - Restart budget exhaustion parks the key instead of retrying forever

pub mod core;
pub mod record;
pub mod worker;

use thiserror::Error;

use crate::resolve::IdentityKey;

pub use self::core::{Dispatch, Supervisor};
pub use record::{ProcessRecord, ProcessState};

/// Per-key supervision failures. Never fatal to the manager.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("user {key}: failed to spawn {program}: {source}")]
    Spawn {
        key: IdentityKey,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("user {key}: failed to encode resolved config: {source}")]
    Encode {
        key: IdentityKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("user {key}: worker ignored stop signal for {timeout_secs}s and was killed")]
    ForcedKill { key: IdentityKey, timeout_secs: u64 },

    #[error("user {key}: failed to signal worker: {source}")]
    Signal {
        key: IdentityKey,
        #[source]
        source: std::io::Error,
    },

    #[error("user {key}: restart budget exhausted after {failures} consecutive failures (max retries {max_retries})")]
    RestartBudgetExhausted {
        key: IdentityKey,
        failures: u32,
        max_retries: u32,
    },
}

impl SupervisorError {
    pub fn key(&self) -> &IdentityKey {
        match self {
            SupervisorError::Spawn { key, .. }
            | SupervisorError::Encode { key, .. }
            | SupervisorError::ForcedKill { key, .. }
            | SupervisorError::Signal { key, .. }
            | SupervisorError::RestartBudgetExhausted { key, .. } => key,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::Spawn { .. } => "spawn",
            SupervisorError::Encode { .. } => "encode",
            SupervisorError::ForcedKill { .. } => "forced_kill",
            SupervisorError::Signal { .. } => "signal",
            SupervisorError::RestartBudgetExhausted { .. } => "exhausted",
        }
    }
}
