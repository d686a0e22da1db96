//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Required instance fields (`user`, non-empty `symbols`)
//! - Duplicate symbols within one instance entry
//! - Value ranges (limits and balances are finite and non-negative)
//! - Manager settings sanity (intervals > 0, worker program set)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function over parsed values
//! - Runs before the document is handed to the resolver

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{Defaults, ManagerSettings, Overrides, RawInstance};

/// A single semantic problem, with enough context to locate it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Where the problem is, e.g. `instances[2]` or `defaults`.
    pub location: String,
    /// User of the offending instance, when known.
    pub user: Option<String>,
    /// Offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(location: impl Into<String>, user: Option<&str>, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            user: user.map(str::to_string),
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{} (user {}): {}: {}", self.location, user, self.field, self.message),
            None => write!(f, "{}: {}: {}", self.location, self.field, self.message),
        }
    }
}

/// Validate the `defaults` block.
pub fn validate_defaults(defaults: &Defaults) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if defaults.live_config_name.trim().is_empty() {
        errors.push(ValidationError::new("defaults", None, "live_config_name", "must not be empty"));
    }
    check_amount(&mut errors, "defaults", None, "long_wallet_exposure_limit", defaults.long_wallet_exposure_limit);
    check_amount(&mut errors, "defaults", None, "short_wallet_exposure_limit", defaults.short_wallet_exposure_limit);
    check_amount(&mut errors, "defaults", None, "assigned_balance", defaults.assigned_balance);

    errors
}

/// Validate one raw instance entry.
pub(crate) fn validate_instance(index: usize, raw: &RawInstance) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let location = format!("instances[{}]", index);
    let user = raw.user.as_deref();

    match user {
        None => errors.push(ValidationError::new(&location, None, "user", "missing required field")),
        Some(u) if u.trim().is_empty() => {
            errors.push(ValidationError::new(&location, None, "user", "must not be empty"))
        }
        Some(_) => {}
    }

    match &raw.symbols {
        None => errors.push(ValidationError::new(&location, user, "symbols", "missing required field")),
        Some(symbols) if symbols.is_empty() => {
            errors.push(ValidationError::new(&location, user, "symbols", "must contain at least one symbol"))
        }
        Some(symbols) => {
            let mut seen = HashSet::new();
            for symbol in symbols {
                if symbol.trim().is_empty() {
                    errors.push(ValidationError::new(&location, user, "symbols", "contains an empty symbol"));
                } else if !seen.insert(symbol.as_str()) {
                    errors.push(ValidationError::new(
                        &location,
                        user,
                        "symbols",
                        format!("duplicate symbol {}", symbol),
                    ));
                }
            }
        }
    }

    validate_overrides(&mut errors, &location, user, &raw.overrides);
    errors
}

fn validate_overrides(errors: &mut Vec<ValidationError>, location: &str, user: Option<&str>, overrides: &Overrides) {
    if let Some(v) = overrides.long_wallet_exposure_limit {
        check_amount(errors, location, user, "long_wallet_exposure_limit", v);
    }
    if let Some(v) = overrides.short_wallet_exposure_limit {
        check_amount(errors, location, user, "short_wallet_exposure_limit", v);
    }
    if let Some(v) = overrides.assigned_balance {
        check_amount(errors, location, user, "assigned_balance", v);
    }
}

fn check_amount(errors: &mut Vec<ValidationError>, location: &str, user: Option<&str>, field: &'static str, value: f64) {
    if !value.is_finite() {
        errors.push(ValidationError::new(location, user, field, "must be a finite number"));
    } else if value < 0.0 {
        errors.push(ValidationError::new(location, user, field, format!("must be >= 0, got {}", value)));
    }
}

/// Validate manager settings.
pub fn validate_settings(settings: &ManagerSettings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if settings.manager.document_path.trim().is_empty() {
        errors.push(ValidationError::new("manager", None, "document_path", "must not be empty"));
    }
    if settings.manager.reconcile_interval_secs == 0 {
        errors.push(ValidationError::new("manager", None, "reconcile_interval_secs", "must be > 0"));
    }
    if settings.worker.program.trim().is_empty() {
        errors.push(ValidationError::new("worker", None, "program", "must not be empty"));
    }
    if settings.worker.stop_timeout_secs == 0 {
        errors.push(ValidationError::new("worker", None, "stop_timeout_secs", "must be > 0"));
    }
    if settings.restart.base_delay_ms > settings.restart.max_delay_ms {
        errors.push(ValidationError::new(
            "restart",
            None,
            "base_delay_ms",
            "must not exceed max_delay_ms",
        ));
    }
    if settings.admin.enabled && settings.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin", None, "api_key", "required when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
