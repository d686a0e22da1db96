//! The coordinating control loop.
//!
//! One cycle:
//! ```text
//! document → load → resolve → identity audit → reconcile(desired, live) → supervisor
//! ```
//! A cycle that fails to load or resolve keeps the last-known-good desired
//! state, reconciles against it and keeps the error for the admin API.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};

use crate::config::loader::{load_document, SchemaError};
use crate::config::schema::ManagerSettings;
use crate::config::watcher::ReloadTrigger;
use crate::observability::{events, metrics};
use crate::reconcile::{Action, Reconciler};
use crate::resolve::{self, CollisionReport, IdentityKey, ResolutionError, ResolveOptions, ResolvedInstance};
use crate::supervisor::Supervisor;

/// A cycle aborted before reaching the supervisor.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),
}

impl ManagerError {
    pub fn kind(&self) -> &'static str {
        match self {
            ManagerError::Schema(_) => "schema_error",
            ManagerError::Resolution(_) => "resolution_error",
        }
    }
}

/// What the last cycles did, for operators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStatus {
    pub cycles: u64,
    pub last_success: Option<SystemTime>,
    /// Error of the most recent cycle, cleared by the next good one.
    pub last_error: Option<String>,
    pub desired_instances: usize,
    pub collisions: Vec<CollisionReport>,
}

/// Outcome of one successful cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub actions: Vec<Action>,
    pub deferred: Vec<IdentityKey>,
    pub collisions: Vec<CollisionReport>,
}

/// Load, resolve and audit the document without touching any process.
pub fn plan(
    document: &Path,
    options: &ResolveOptions,
) -> Result<(Vec<ResolvedInstance>, Vec<CollisionReport>), ManagerError> {
    let (defaults, specs) = load_document(document)?;
    let resolved = resolve::resolve(&defaults, &specs, options)?;
    let collisions = resolve::validate(&resolved);
    Ok((resolved, collisions))
}

pub fn resolve_options(settings: &ManagerSettings) -> ResolveOptions {
    ResolveOptions {
        live_configs_dir: settings.worker.live_configs_dir.clone(),
        allow_market_type_alias: settings.manager.allow_market_type_alias,
    }
}

/// Owns the reconciler and drives the supervisor.
pub struct Manager {
    document_path: PathBuf,
    interval: Duration,
    options: ResolveOptions,
    supervisor: Supervisor,
    reconciler: Reconciler,
    desired: Arc<ArcSwap<Vec<ResolvedInstance>>>,
    status: Arc<ArcSwap<CycleStatus>>,
}

impl Manager {
    pub fn new(settings: &ManagerSettings) -> Self {
        Self {
            document_path: PathBuf::from(&settings.manager.document_path),
            interval: Duration::from_secs(settings.manager.reconcile_interval_secs),
            options: resolve_options(settings),
            supervisor: Supervisor::new(settings.worker.clone(), &settings.restart),
            reconciler: Reconciler::new(),
            desired: Arc::new(ArcSwap::from_pointee(Vec::new())),
            status: Arc::new(ArcSwap::from_pointee(CycleStatus::default())),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Last-known-good desired state.
    pub fn desired_handle(&self) -> Arc<ArcSwap<Vec<ResolvedInstance>>> {
        self.desired.clone()
    }

    pub fn status_handle(&self) -> Arc<ArcSwap<CycleStatus>> {
        self.status.clone()
    }

    /// Run one reconciliation cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, ManagerError> {
        let (resolved, collisions) = match plan(&self.document_path, &self.options) {
            Ok(planned) => planned,
            Err(e) => {
                metrics::record_cycle(e.kind());
                tracing::error!(
                    event = "cycle_failed",
                    kind = e.kind(),
                    error = %e,
                    kept_instances = self.desired.load().len(),
                    "Cycle aborted, keeping last-known-good desired state"
                );
                let mut status = CycleStatus::clone(&self.status.load());
                status.cycles += 1;
                status.last_error = Some(e.to_string());
                let had_good_cycle = status.last_success.is_some();
                self.status.store(Arc::new(status));

                // Deferred actions still need a cycle to be recomputed in.
                if had_good_cycle {
                    let desired = self.desired.load_full();
                    self.converge(&desired).await;
                }
                return Err(e);
            }
        };

        for report in &collisions {
            events::collision(report);
        }

        self.desired.store(Arc::new(resolved));
        let desired = self.desired.load_full();
        metrics::record_desired(desired.len());

        let (actions, deferred) = self.converge(&desired).await;

        metrics::record_cycle("ok");
        let previous = self.status.load();
        self.status.store(Arc::new(CycleStatus {
            cycles: previous.cycles + 1,
            last_success: Some(SystemTime::now()),
            last_error: None,
            desired_instances: desired.len(),
            collisions: collisions.clone(),
        }));

        tracing::debug!(
            desired = desired.len(),
            actions = actions.len(),
            deferred = deferred.len(),
            "Cycle complete"
        );

        Ok(CycleReport {
            actions,
            deferred,
            collisions,
        })
    }

    /// Move the live processes toward `desired`. Returns the actions issued and the keys deferred.
    async fn converge(&mut self, desired: &[ResolvedInstance]) -> (Vec<Action>, Vec<IdentityKey>) {
        let live = self.supervisor.snapshot().await;
        let actions = self.reconciler.reconcile(desired, &live);
        for action in &actions {
            events::action_issued(action);
        }

        let deferred = self.supervisor.execute(actions.clone()).await;
        for key in &deferred {
            self.reconciler.defer(key);
        }
        (actions, deferred)
    }

    /// Cycle on the interval and on reload requests until shutdown, then stop every worker.
    pub async fn run(
        mut self,
        mut reload_rx: mpsc::UnboundedReceiver<ReloadTrigger>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(
            document = %self.document_path.display(),
            interval_secs = self.interval.as_secs(),
            "Manager starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.run_cycle().await;
                }
                Some(trigger) = reload_rx.recv() => {
                    // Editors emit bursts of events for one save.
                    while reload_rx.try_recv().is_ok() {}
                    tracing::info!(trigger = ?trigger, "Reconciliation requested");
                    let _ = self.run_cycle().await;
                    ticker.reset();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Manager received shutdown signal, exiting loop");
                    break;
                }
            }
        }

        self.supervisor.shutdown().await;
        tracing::info!("All workers stopped");
    }
}
