//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Worker exits unexpectedly:
//!     → backoff.rs (consecutive failures → delay, budget check)
//!     → supervisor waits, then relaunches
//!     → budget spent: key marked exhausted and reported
//! ```
//!
//! # Design Decisions
//! - Jittered backoff prevents a restart stampede after a shared outage
//! - The budget counts consecutive failures; a long healthy run resets it
//! - An exhausted key is never retried until its config changes

pub mod backoff;

pub use backoff::{calculate_backoff, RestartBackoff};
