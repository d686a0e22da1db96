//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! instances.yaml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors collected)
//!     → (Defaults, Vec<InstanceSpec>) handed to the resolver
//!
//! manager.toml
//!     → loader.rs → validation.rs → ManagerSettings
//!
//! On change:
//!     watcher.rs detects the edit
//!     → control loop runs a fresh cycle
//!     → a failed load keeps the last-known-good desired state
//! ```
//!
//! # Design Decisions
//! - The document is re-read every cycle; nothing is cached between cycles
//! - Manager settings have defaults for every field to allow minimal files
//! - Validation separates syntactic (serde) from semantic checks
//! - Unknown keys are ignored so newer documents load on older managers

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load, load_document, load_settings, SchemaError, SettingsError};
pub use schema::{
    AdminConfig, Defaults, InstanceSpec, LoopConfig, ManagerSettings, MarketType, ObservabilityConfig,
    Overrides, RestartConfig, TradingMode, WorkerConfig,
};
