//! Reconciliation subsystem.
//!
//! # Data Flow
//! ```text
//! Vec<ResolvedInstance> (desired)  +  supervisor snapshot (live)
//!     → state.rs (per-key state machine, updated from live)
//!     → reconciler.rs (diff by identity key and content hash)
//!     → Vec<Action> (Start / Stop / Restart, one per key)
//!     → supervisor executes; busy keys come back as deferred
//! ```
//!
//! # Design Decisions
//! - A key with an action in flight gets no new action until the supervisor confirms
//! - Unchanged inputs produce an empty batch
//! - Content hashes, not field-by-field comparison, decide restarts

pub mod reconciler;
pub mod state;

pub use reconciler::{Action, LiveTable, Reconciler};
pub use state::{KeyState, KeyTrack};
