//! Instance manager for trading-bot workers.
//!
//! Reads a declarative instance document, resolves it into one worker per
//! exchange account, and keeps the running processes converged on it.

pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod manager;
pub mod observability;
pub mod reconcile;
pub mod resilience;
pub mod resolve;
pub mod supervisor;

pub use config::schema::ManagerSettings;
pub use lifecycle::Shutdown;
pub use manager::Manager;
