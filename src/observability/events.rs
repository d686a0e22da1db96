//! Structured events for collisions, actions and worker lifecycle.
//!
//! Each function logs one event with stable field names and bumps the matching
//! metric, so log pipelines and dashboards see the same thing.

use crate::reconcile::Action;
use crate::resolve::{CollisionReport, IdentityKey};
use crate::supervisor::{ProcessState, SupervisorError};

use super::metrics;

pub fn collision(report: &CollisionReport) {
    metrics::record_collision();
    let symbols: Vec<String> = report
        .origins
        .iter()
        .map(|o| format!("#{}:{}", o.spec_index, o.symbols.join(",")))
        .collect();

    if report.aliased_market_types.is_empty() && report.ignored_override_count() == 0 {
        tracing::info!(
            event = "collision",
            user = %report.identity_key,
            entries = ?report.spec_indices,
            symbols = ?symbols,
            "Entries merged into one instance"
        );
    } else {
        let ignored: Vec<String> = report
            .origins
            .iter()
            .filter(|o| !o.ignored_overrides.is_empty())
            .map(|o| format!("#{}:{}", o.spec_index, o.ignored_overrides.join(",")))
            .collect();
        tracing::warn!(
            event = "collision",
            user = %report.identity_key,
            entries = ?report.spec_indices,
            symbols = ?symbols,
            ignored_overrides = ?ignored,
            aliased_market_types = ?report.aliased_market_types,
            "Entries merged into one instance; later overrides ignored"
        );
    }
}

pub fn action_issued(action: &Action) {
    metrics::record_action(action.name());
    match action {
        Action::Start(instance) | Action::Restart(instance) => tracing::info!(
            event = "action",
            action = action.name(),
            user = %instance.identity_key,
            symbols = %instance.symbols.join(","),
            market_type = %instance.market_type,
            "Reconciler action"
        ),
        Action::Stop(key) => tracing::info!(
            event = "action",
            action = action.name(),
            user = %key,
            "Reconciler action"
        ),
    }
}

pub fn action_deferred(key: &IdentityKey, action: &'static str) {
    metrics::record_deferred(action);
    tracing::info!(event = "action_deferred", action, user = %key, "Key busy, action deferred to next cycle");
}

pub fn worker_transition(key: &IdentityKey, from: ProcessState, to: ProcessState) {
    metrics::record_transition(to.as_str());
    tracing::info!(
        event = "worker_state",
        user = %key,
        from = from.as_str(),
        to = to.as_str(),
        "Worker state change"
    );
}

pub fn worker_failed(key: &IdentityKey, reason: &str, failures: u32) {
    tracing::warn!(event = "worker_failed", user = %key, failures, reason, "Worker failed");
}

pub fn worker_restarted(key: &IdentityKey, config_changed: bool) {
    let reason = if config_changed { "config" } else { "failure" };
    metrics::record_restart(reason);
    tracing::debug!(event = "worker_restart", user = %key, reason, "Relaunching worker");
}

pub fn supervisor_error(err: &SupervisorError) {
    metrics::record_supervisor_error(err.kind());
    tracing::error!(event = "supervisor_error", user = %err.key(), kind = err.kind(), error = %err, "Supervisor error");
}
