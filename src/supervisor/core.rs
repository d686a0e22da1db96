//! Supervisor: owns the process table and one monitor task per worker.
//!
//! ```text
//! Supervisor::execute(actions)
//!     ├─► Start(instance)   → insert record (starting) → spawn monitor task
//!     ├─► Stop(key)         → mark stopping → Command::Stop to monitor
//!     └─► Restart(instance) → mark stopping → Command::Restart to monitor
//!
//! monitor task (owns the Child)
//!     launch → grace period → running
//!         ├─ exit    → failed → backoff → relaunch (or exhausted)
//!         └─ command → SIGTERM, wait, kill on timeout → stopped/removed or relaunch
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::schema::{RestartConfig, WorkerConfig};
use crate::observability::events;
use crate::reconcile::{Action, LiveTable};
use crate::resilience::RestartBackoff;
use crate::resolve::{IdentityKey, ResolvedInstance};
use crate::supervisor::record::{ProcessRecord, ProcessState};
use crate::supervisor::worker::{spawn_worker, terminate, StopOutcome};
use crate::supervisor::SupervisorError;

/// Instruction for a monitor task.
#[derive(Debug)]
enum Command {
    Stop,
    Restart(ResolvedInstance),
}

/// Whether the supervisor took an action or left it for the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Accepted,
    Deferred,
}

struct Slot {
    record: ProcessRecord,
    commands: mpsc::UnboundedSender<Command>,
    join: Option<JoinHandle<()>>,
}

type Table = Arc<Mutex<HashMap<IdentityKey, Slot>>>;

/// Owns every worker process the manager runs.
#[derive(Clone)]
pub struct Supervisor {
    table: Table,
    worker: Arc<WorkerConfig>,
    backoff: Arc<RestartBackoff>,
}

impl Supervisor {
    pub fn new(worker: WorkerConfig, restart: &RestartConfig) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            worker: Arc::new(worker),
            backoff: Arc::new(RestartBackoff::new(restart)),
        }
    }

    /// Run a batch of actions. Returns the keys that were busy and deferred.
    pub async fn execute(&self, actions: Vec<Action>) -> Vec<IdentityKey> {
        let mut deferred = Vec::new();
        for action in actions {
            let key = action.key().clone();
            let name = action.name();
            let dispatch = match action {
                Action::Start(instance) => self.start(instance).await,
                Action::Stop(key) => self.stop(&key).await,
                Action::Restart(instance) => self.restart(instance).await,
            };
            if dispatch == Dispatch::Deferred {
                events::action_deferred(&key, name);
                deferred.push(key);
            }
        }
        deferred
    }

    /// Launch a worker for `instance`.
    pub async fn start(&self, instance: ResolvedInstance) -> Dispatch {
        let mut table = self.table.lock().await;
        let key = instance.identity_key.clone();

        if let Some(slot) = table.get_mut(&key) {
            if slot.record.state.is_busy() {
                return Dispatch::Deferred;
            }
            // Already supervised: replace whatever is there.
            return request(slot, Command::Restart(instance));
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let monitor = Monitor {
            key: key.clone(),
            table: self.table.clone(),
            worker: self.worker.clone(),
            backoff: self.backoff.clone(),
        };
        let record = ProcessRecord::new(key.clone(), instance.content_hash());
        let join = tokio::spawn(monitor.run(instance, rx));

        table.insert(
            key,
            Slot {
                record,
                commands,
                join: Some(join),
            },
        );
        Dispatch::Accepted
    }

    /// Gracefully stop the worker for `key` and forget it.
    pub async fn stop(&self, key: &IdentityKey) -> Dispatch {
        let mut table = self.table.lock().await;
        match table.get_mut(key) {
            None => Dispatch::Accepted,
            Some(slot) if slot.record.state.is_busy() => Dispatch::Deferred,
            Some(slot) => request(slot, Command::Stop),
        }
    }

    /// Stop the worker for `instance`'s key and launch it again with the new config.
    pub async fn restart(&self, instance: ResolvedInstance) -> Dispatch {
        {
            let mut table = self.table.lock().await;
            if let Some(slot) = table.get_mut(&instance.identity_key) {
                if slot.record.state.is_busy() {
                    return Dispatch::Deferred;
                }
                return request(slot, Command::Restart(instance));
            }
        }
        // Nothing to replace.
        self.start(instance).await
    }

    /// Current process table.
    pub async fn snapshot(&self) -> LiveTable {
        let table = self.table.lock().await;
        table
            .iter()
            .map(|(key, slot)| (key.clone(), slot.record.clone()))
            .collect::<BTreeMap<_, _>>()
    }

    pub async fn record(&self, key: &IdentityKey) -> Option<ProcessRecord> {
        self.table.lock().await.get(key).map(|slot| slot.record.clone())
    }

    /// Stop every worker and wait for each to exit.
    pub async fn shutdown(&self) {
        let joins: Vec<(IdentityKey, JoinHandle<()>)> = {
            let mut table = self.table.lock().await;
            table
                .iter_mut()
                .filter_map(|(key, slot)| {
                    set_state(key, &mut slot.record, ProcessState::Stopping);
                    let _ = slot.commands.send(Command::Stop);
                    slot.join.take().map(|join| (key.clone(), join))
                })
                .collect()
        };

        tracing::info!(workers = joins.len(), "Stopping all workers");
        for (key, join) in joins {
            if let Err(e) = join.await {
                tracing::error!(user = %key, error = %e, "Worker monitor task failed");
            }
        }
    }
}

fn request(slot: &mut Slot, command: Command) -> Dispatch {
    let key = slot.record.identity_key.clone();
    if slot.commands.send(command).is_err() {
        tracing::warn!(user = %key, "Worker monitor is gone, deferring");
        return Dispatch::Deferred;
    }
    set_state(&key, &mut slot.record, ProcessState::Stopping);
    Dispatch::Accepted
}

fn set_state(key: &IdentityKey, record: &mut ProcessRecord, next: ProcessState) {
    if record.state != next {
        events::worker_transition(key, record.state, next);
        record.state = next;
    }
}

enum Outcome {
    /// The child died or never started.
    Failed { reason: String, uptime: Duration },
    /// Stopped on request; the slot is already removed.
    Stopped,
    /// Stopped to be relaunched with a new config.
    Replaced(ResolvedInstance),
}

enum Next {
    Relaunch,
    Exit,
}

/// Per-worker task; the only owner of the Child.
struct Monitor {
    key: IdentityKey,
    table: Table,
    worker: Arc<WorkerConfig>,
    backoff: Arc<RestartBackoff>,
}

impl Monitor {
    async fn run(self, mut instance: ResolvedInstance, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let outcome = match self.launch(&instance).await {
                Ok(child) => self.watch(child, &mut commands).await,
                Err(err) => Outcome::Failed {
                    reason: err.to_string(),
                    uptime: Duration::ZERO,
                },
            };

            let next = match outcome {
                Outcome::Failed { reason, uptime } => {
                    self.on_failure(reason, uptime, &mut instance, &mut commands).await
                }
                Outcome::Stopped => Next::Exit,
                Outcome::Replaced(new) => {
                    instance = new;
                    self.count_relaunch(true).await;
                    Next::Relaunch
                }
            };

            if let Next::Exit = next {
                return;
            }
        }
    }

    async fn launch(&self, instance: &ResolvedInstance) -> Result<Child, SupervisorError> {
        self.update(|key, record| {
            set_state(key, record, ProcessState::Starting);
            record.config_hash = instance.content_hash();
            record.last_start_time = Some(SystemTime::now());
            record.pid = None;
        })
        .await;

        let child = spawn_worker(&self.worker, instance)?;
        let pid = child.id();
        tracing::info!(
            user = %self.key,
            pid = ?pid,
            symbols = %instance.symbols.join(","),
            market_type = %instance.market_type,
            live_config = %instance.live_config_path,
            "Worker spawned"
        );
        self.update(|_, record| record.pid = pid).await;
        Ok(child)
    }

    async fn watch(&self, mut child: Child, commands: &mut mpsc::UnboundedReceiver<Command>) -> Outcome {
        let started = Instant::now();
        let grace = tokio::time::sleep(Duration::from_millis(self.worker.startup_grace_ms));
        tokio::pin!(grace);

        tokio::select! {
            status = child.wait() => {
                return Outcome::Failed {
                    reason: describe_exit("during startup", status),
                    uptime: started.elapsed(),
                };
            }
            _ = &mut grace => {
                self.update(|key, record| {
                    set_state(key, record, ProcessState::Running);
                    record.last_error = None;
                })
                .await;
            }
            command = commands.recv() => {
                return self.handle_command(&mut child, command).await;
            }
        }

        tokio::select! {
            status = child.wait() => Outcome::Failed {
                reason: describe_exit("unexpectedly", status),
                uptime: started.elapsed(),
            },
            command = commands.recv() => self.handle_command(&mut child, command).await,
        }
    }

    async fn handle_command(&self, child: &mut Child, command: Option<Command>) -> Outcome {
        self.stop_child(child).await;
        match command {
            Some(Command::Restart(new)) => Outcome::Replaced(new),
            Some(Command::Stop) | None => {
                self.finish().await;
                Outcome::Stopped
            }
        }
    }

    async fn stop_child(&self, child: &mut Child) {
        self.update(|key, record| set_state(key, record, ProcessState::Stopping))
            .await;

        let timeout = Duration::from_secs(self.worker.stop_timeout_secs);
        let error = match terminate(child, timeout).await {
            Ok(StopOutcome::Graceful(status)) => {
                tracing::info!(user = %self.key, status = %status, "Worker exited");
                None
            }
            Ok(StopOutcome::Killed) => Some(SupervisorError::ForcedKill {
                key: self.key.clone(),
                timeout_secs: self.worker.stop_timeout_secs,
            }),
            Err(source) => Some(SupervisorError::Signal {
                key: self.key.clone(),
                source,
            }),
        };

        if let Some(err) = &error {
            events::supervisor_error(err);
        }
        self.update(|_, record| {
            record.pid = None;
            if let Some(err) = error {
                record.last_error = Some(err.to_string());
            }
        })
        .await;
    }

    async fn on_failure(
        &self,
        reason: String,
        uptime: Duration,
        instance: &mut ResolvedInstance,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Next {
        let backoff = self.backoff.clone();
        let failures = self
            .update(|key, record| {
                if backoff.resets_streak(uptime) {
                    record.consecutive_failures = 0;
                }
                record.consecutive_failures += 1;
                record.pid = None;
                record.last_error = Some(reason.clone());
                record.exhausted = backoff.is_exhausted(record.consecutive_failures);
                set_state(key, record, ProcessState::Failed);
                record.consecutive_failures
            })
            .await
            .unwrap_or_default();

        events::worker_failed(&self.key, &reason, failures);

        if self.backoff.is_exhausted(failures) {
            let err = SupervisorError::RestartBudgetExhausted {
                key: self.key.clone(),
                failures,
                max_retries: self.backoff.max_retries(),
            };
            events::supervisor_error(&err);
            self.update(|_, record| record.last_error = Some(err.to_string()))
                .await;

            // Parked until the config changes or the key is removed.
            return match commands.recv().await {
                Some(Command::Restart(new)) => {
                    *instance = new;
                    self.count_relaunch(true).await;
                    Next::Relaunch
                }
                Some(Command::Stop) | None => {
                    self.finish().await;
                    Next::Exit
                }
            };
        }

        let delay = self.backoff.delay(failures);
        tracing::warn!(
            user = %self.key,
            attempt = failures,
            max_retries = self.backoff.max_retries(),
            delay = ?delay,
            "Restarting worker after backoff"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                self.count_relaunch(false).await;
                Next::Relaunch
            }
            command = commands.recv() => match command {
                Some(Command::Restart(new)) => {
                    *instance = new;
                    self.count_relaunch(true).await;
                    Next::Relaunch
                }
                Some(Command::Stop) | None => {
                    self.finish().await;
                    Next::Exit
                }
            },
        }
    }

    async fn count_relaunch(&self, config_changed: bool) {
        self.update(|_, record| {
            record.restart_count += 1;
            if config_changed {
                record.consecutive_failures = 0;
                record.exhausted = false;
            }
        })
        .await;
        events::worker_restarted(&self.key, config_changed);
    }

    /// Mark the record stopped and drop it from the table.
    async fn finish(&self) {
        let mut table = self.table.lock().await;
        if let Some(mut slot) = table.remove(&self.key) {
            set_state(&self.key, &mut slot.record, ProcessState::Stopped);
            tracing::info!(user = %self.key, restarts = slot.record.restart_count, "Worker removed");
        }
    }

    async fn update<T>(&self, f: impl FnOnce(&IdentityKey, &mut ProcessRecord) -> T) -> Option<T> {
        let mut table = self.table.lock().await;
        table.get_mut(&self.key).map(|slot| f(&self.key, &mut slot.record))
    }
}

fn describe_exit(when: &str, status: std::io::Result<std::process::ExitStatus>) -> String {
    match status {
        Ok(status) => format!("worker exited {} ({})", when, status),
        Err(e) => format!("worker wait failed {}: {}", when, e),
    }
}
