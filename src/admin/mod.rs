//! Read-only admin API.
//!
//! # Endpoints
//! - `GET /admin/status`: cycle counters and the last cycle error
//! - `GET /admin/instances`: desired instances joined with their process records
//! - `GET /admin/collisions`: collision reports from the last good cycle
//!
//! All endpoints require `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::manager::{CycleStatus, Manager};
use crate::resolve::ResolvedInstance;
use crate::supervisor::Supervisor;

/// Shared state injected into admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<String>,
    pub supervisor: Supervisor,
    pub status: Arc<ArcSwap<CycleStatus>>,
    pub desired: Arc<ArcSwap<Vec<ResolvedInstance>>>,
}

impl AdminState {
    pub fn new(api_key: &str, manager: &Manager) -> Self {
        Self {
            api_key: Arc::new(api_key.to_string()),
            supervisor: manager.supervisor().clone(),
            status: manager.status_handle(),
            desired: manager.desired_handle(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/instances", get(get_instances))
        .route("/admin/collisions", get(get_collisions))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
