//! Configuration schema definitions.
//!
//! Two documents are described here:
//! - the instance document (YAML): `defaults` plus a list of `instances`;
//! - the manager settings (TOML): how the manager itself runs.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Market a worker trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    #[default]
    Futures,
    Spot,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Futures => "futures",
            MarketType::Spot => "spot",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-side trading mode handed to the worker.
///
/// `n` normal, `m` manual, `gs` graceful stop, `p` panic, `t` take-profit only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
pub enum TradingMode {
    #[default]
    #[serde(rename = "n")]
    Normal,
    #[serde(rename = "m")]
    Manual,
    #[serde(rename = "gs")]
    GracefulStop,
    #[serde(rename = "p")]
    Panic,
    #[serde(rename = "t")]
    TakeProfitOnly,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Normal => "n",
            TradingMode::Manual => "m",
            TradingMode::GracefulStop => "gs",
            TradingMode::Panic => "p",
            TradingMode::TakeProfitOnly => "t",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account-level defaults shared by every instance.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    /// Name of the live config file handed to workers.
    pub live_config_name: String,

    /// Explicit path to the live config; derived from the name when absent.
    #[serde(default)]
    pub live_config_path: Option<String>,

    #[serde(default)]
    pub market_type: MarketType,

    /// 0 means unlimited.
    #[serde(default)]
    pub long_wallet_exposure_limit: f64,

    /// 0 means unlimited.
    #[serde(default)]
    pub short_wallet_exposure_limit: f64,

    /// 0 means "not set", the worker falls back to its own balance logic.
    #[serde(default)]
    pub assigned_balance: f64,

    #[serde(default)]
    pub long_mode: TradingMode,

    #[serde(default)]
    pub short_mode: TradingMode,
}

/// Per-field overrides carried by an instance entry.
///
/// Every field is optional; a present field wins over [`Defaults`].
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Overrides {
    pub live_config_name: Option<String>,
    pub live_config_path: Option<String>,
    pub market_type: Option<MarketType>,
    pub long_wallet_exposure_limit: Option<f64>,
    pub short_wallet_exposure_limit: Option<f64>,
    pub assigned_balance: Option<f64>,
    pub long_mode: Option<TradingMode>,
    pub short_mode: Option<TradingMode>,
}

/// One validated entry of the `instances` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSpec {
    /// Position of the entry in the document.
    pub index: usize,
    pub user: String,
    pub symbols: Vec<String>,
    pub overrides: Overrides,
}

/// Raw shape of an instance entry before required fields are checked.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawInstance {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    #[serde(flatten)]
    pub overrides: Overrides,
}

/// Raw shape of the whole document.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawDocument {
    #[serde(default)]
    pub defaults: Option<Defaults>,
    #[serde(default)]
    pub instances: Option<Vec<RawInstance>>,
}

/// Root settings for the manager process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ManagerSettings {
    /// Control loop settings.
    pub manager: LoopConfig,

    /// How workers are launched and stopped.
    pub worker: WorkerConfig,

    /// Restart-on-failure policy.
    pub restart: RestartConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Control loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Path to the instance document.
    pub document_path: String,

    /// Seconds between reconciliation cycles.
    pub reconcile_interval_secs: u64,

    /// Re-run a cycle when the document changes on disk.
    pub watch_document: bool,

    /// Treat same-user/different-market_type entries as a warning instead of
    /// an error. Needed when two user names share one set of credentials.
    pub allow_market_type_alias: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            document_path: "instances.yaml".to_string(),
            reconcile_interval_secs: 30,
            watch_document: true,
            allow_market_type_alias: false,
        }
    }
}

/// Worker launch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Executable to run for every instance.
    pub program: String,

    /// Arguments placed before the per-instance arguments.
    pub args: Vec<String>,

    /// Directory live config names are resolved against.
    pub live_configs_dir: String,

    /// Working directory for workers (inherits the manager's when unset).
    pub working_dir: Option<String>,

    /// A worker still alive after this long is considered running.
    pub startup_grace_ms: u64,

    /// Time allowed between SIGTERM and a forced kill.
    pub stop_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["passivbot.py".to_string()],
            live_configs_dir: "configs/live".to_string(),
            working_dir: None,
            startup_grace_ms: 5_000,
            stop_timeout_secs: 10,
        }
    }
}

/// Restart policy for workers that exit unexpectedly.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Consecutive failures tolerated before a key is given up on.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// A worker that stayed up this long has its failure count reset.
    pub reset_after_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            reset_after_secs: 300,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
