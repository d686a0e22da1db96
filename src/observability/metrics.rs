//! Metrics collection and exposition.
//!
//! # Metrics
//! - `manager_actions_total` (counter): actions issued, by action
//! - `manager_actions_deferred_total` (counter): actions left for the next cycle
//! - `manager_collisions_total` (counter): identity keys fed by several entries
//! - `manager_cycles_total` (counter): reconciliation cycles, by outcome
//! - `manager_worker_transitions_total` (counter): worker state changes, by target state
//! - `manager_worker_restarts_total` (counter): relaunches, by reason
//! - `manager_supervisor_errors_total` (counter): per-key supervision errors, by kind
//! - `manager_desired_instances` (gauge): size of the last-known-good desired set

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_action(action: &'static str) {
    counter!("manager_actions_total", "action" => action).increment(1);
}

pub fn record_deferred(action: &'static str) {
    counter!("manager_actions_deferred_total", "action" => action).increment(1);
}

pub fn record_collision() {
    counter!("manager_collisions_total").increment(1);
}

pub fn record_cycle(outcome: &'static str) {
    counter!("manager_cycles_total", "outcome" => outcome).increment(1);
}

pub fn record_desired(count: usize) {
    gauge!("manager_desired_instances").set(count as f64);
}

pub fn record_transition(to: &'static str) {
    counter!("manager_worker_transitions_total", "state" => to).increment(1);
}

pub fn record_restart(reason: &'static str) {
    counter!("manager_worker_restarts_total", "reason" => reason).increment(1);
}

pub fn record_supervisor_error(kind: &'static str) {
    counter!("manager_supervisor_errors_total", "kind" => kind).increment(1);
}
