//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Honour `RUST_LOG` over the configured level
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Every event carries `user` when it concerns one instance

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `level` applies when `RUST_LOG` is unset.
pub fn init_logging(level: &str) {
    let fallback = format!("instance_manager={level},manager_cli={level},tower_http=info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into());

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
