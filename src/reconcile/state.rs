//! Per-key reconciliation state machine.
//!
//! # States
//! - Absent: never seen (implicit, not stored)
//! - Desired: Start issued, waiting for the worker to come up
//! - Running: worker confirmed up with the expected config
//! - Draining: Stop or Restart issued, waiting for the old worker to go
//! - Gone: worker confirmed exited
//!
//! # State Transitions
//! ```text
//! Absent/Gone → Desired:  key appears in the resolved set
//! Desired → Running:      supervisor reports running with the target hash
//! Running → Draining:     key removed, or content hash changed
//! Draining → Gone:        supervisor no longer lists the key
//! Draining → Running:     restart finished, running with the new hash
//! Running → Running:      unchanged config
//! ```

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    Absent,
    Desired,
    Running,
    Draining,
    Gone,
}

/// What the reconciler remembers about one key between cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTrack {
    pub state: KeyState,
    /// Content hash the key is converging to. `None` while draining for removal.
    pub target_hash: Option<u64>,
}

impl KeyTrack {
    pub fn new(state: KeyState, target_hash: Option<u64>) -> Self {
        Self { state, target_hash }
    }

    /// Move to `next`, logging the edge.
    pub fn transition(&mut self, key: &str, next: KeyState) {
        if self.state != next {
            tracing::debug!(user = %key, from = ?self.state, to = ?next, "Reconciler state change");
            self.state = next;
        }
    }
}
