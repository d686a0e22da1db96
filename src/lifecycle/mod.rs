//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!     SIGHUP → reconciliation cycle now
//!
//! Shutdown (shutdown.rs):
//!     trigger → control loop exits → every worker stopped and awaited → exit
//! ```
//!
//! # Design Decisions
//! - Workers are never orphaned: the manager exits only after the supervisor drains
//! - Each worker stop has its own timeout, then a forced kill

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
