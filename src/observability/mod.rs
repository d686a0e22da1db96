//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! resolver / reconciler / supervisor
//!     → events.rs (one structured event per collision, action, state change)
//!     → logging.rs (tracing subscriber, stdout)
//!     → metrics.rs (Prometheus counters and gauges)
//! ```
//!
//! # Design Decisions
//! - The core produces events; where they end up is the subscriber's business
//! - Metric updates are cheap and always on; the exporter is optional

pub mod events;
pub mod logging;
pub mod metrics;
