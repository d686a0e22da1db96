use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::config::schema::MarketType;
use crate::resolve::{CollisionReport, IdentityKey};
use crate::supervisor::ProcessRecord;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub cycles: u64,
    pub last_error: Option<String>,
    pub desired_instances: usize,
    pub workers: usize,
}

#[derive(Serialize)]
pub struct InstanceStatus {
    pub identity_key: IdentityKey,
    /// False for workers still draining after removal from the document.
    pub desired: bool,
    pub symbols: Vec<String>,
    pub market_type: Option<MarketType>,
    pub live_config_name: Option<String>,
    pub process: Option<ProcessRecord>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let status = state.status.load();
    let workers = state.supervisor.snapshot().await.len();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if status.last_error.is_some() { "degraded" } else { "operational" },
        cycles: status.cycles,
        last_error: status.last_error.clone(),
        desired_instances: status.desired_instances,
        workers,
    })
}

pub async fn get_instances(State(state): State<AdminState>) -> Json<Vec<InstanceStatus>> {
    let desired = state.desired.load_full();
    let mut live = state.supervisor.snapshot().await;

    let mut statuses: Vec<InstanceStatus> = desired
        .iter()
        .map(|instance| InstanceStatus {
            identity_key: instance.identity_key.clone(),
            desired: true,
            symbols: instance.symbols.clone(),
            market_type: Some(instance.market_type),
            live_config_name: Some(instance.live_config_name.clone()),
            process: live.remove(&instance.identity_key),
        })
        .collect();

    statuses.extend(live.into_iter().map(|(key, record)| InstanceStatus {
        identity_key: key,
        desired: false,
        symbols: Vec::new(),
        market_type: None,
        live_config_name: None,
        process: Some(record),
    }));

    Json(statuses)
}

pub async fn get_collisions(State(state): State<AdminState>) -> Json<Vec<CollisionReport>> {
    Json(state.status.load().collisions.clone())
}
