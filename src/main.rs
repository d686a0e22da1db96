//! Instance manager (v1)
//!
//! Keeps one worker process per exchange account running, converged on a
//! declarative instance document.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌────────────────────────────────────────────────────────┐
//!                  │                   INSTANCE MANAGER                      │
//!                  │                                                         │
//!  instances.yaml  │  ┌────────┐    ┌──────────┐    ┌──────────┐            │
//!  ────────────────┼─▶│ config │───▶│ resolve  │───▶│ identity │            │
//!                  │  │ loader │    │ (merge)  │    │  audit   │            │
//!                  │  └────────┘    └──────────┘    └────┬─────┘            │
//!                  │                                     ▼                   │
//!                  │                              ┌────────────┐             │
//!                  │             live snapshot ──▶│ reconcile  │             │
//!                  │                   ▲          └─────┬──────┘             │
//!                  │                   │                ▼ actions            │
//!                  │              ┌────┴──────────────────────┐   workers    │
//!                  │              │        supervisor         │─────────────┼──▶ one process
//!                  │              │ spawn / SIGTERM / backoff │             │    per account
//!                  │              └───────────────────────────┘             │
//!                  │                                                         │
//!                  │  Cross-cutting: observability, lifecycle, admin API     │
//!                  └────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use instance_manager::admin::{self, AdminState};
use instance_manager::config::{load_settings, watcher::DocumentWatcher, ManagerSettings};
use instance_manager::lifecycle::{signals::spawn_signal_listener, Shutdown};
use instance_manager::manager::{plan, resolve_options, Manager};
use instance_manager::observability::{logging::init_logging, metrics::init_metrics};

#[derive(Parser)]
#[command(name = "instance-manager")]
#[command(about = "Keeps trading-bot workers converged on an instance document", long_about = None)]
struct Cli {
    /// Manager settings file. Defaults apply when it does not exist.
    #[arg(short, long, default_value = "manager.toml")]
    settings: PathBuf,

    /// Instance document, overriding `manager.document_path`.
    #[arg(short, long)]
    document: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop (default)
    Run,
    /// Resolve a document and print the result without starting anything
    Check {
        /// Document to check (defaults to the configured one)
        document: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut settings = if cli.settings.exists() {
        load_settings(&cli.settings)?
    } else {
        ManagerSettings::default()
    };
    if let Some(document) = &cli.document {
        settings.manager.document_path = document.display().to_string();
    }

    init_logging(&settings.observability.log_level);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check { document } => check(&settings, document),
        Commands::Run => run(settings).await,
    }
}

fn check(settings: &ManagerSettings, document: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = document.unwrap_or_else(|| PathBuf::from(&settings.manager.document_path));
    let (instances, collisions) = plan(&path, &resolve_options(settings))?;

    let report = serde_json::json!({
        "instances": instances,
        "collisions": collisions,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(settings: ManagerSettings) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("instance-manager v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        document = %settings.manager.document_path,
        program = %settings.worker.program,
        interval_secs = settings.manager.reconcile_interval_secs,
        max_retries = settings.restart.max_retries,
        "Configuration loaded"
    );

    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let (reload_tx, reload_rx) = mpsc::unbounded_channel();
    spawn_signal_listener(shutdown.clone(), reload_tx.clone());

    // Dropping the watcher stops notifications; keep it for the process lifetime.
    let _watcher = if settings.manager.watch_document {
        let path = PathBuf::from(&settings.manager.document_path);
        match DocumentWatcher::new(&path, reload_tx.clone()).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Document watcher unavailable, relying on the interval");
                None
            }
        }
    } else {
        None
    };

    let manager = Manager::new(&settings);

    let admin_task = if settings.admin.enabled {
        let listener = TcpListener::bind(&settings.admin.bind_address).await?;
        let state = AdminState::new(&settings.admin.api_key, &manager);
        let rx = shutdown.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, state, rx).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }))
    } else {
        None
    };

    manager.run(reload_rx, shutdown.subscribe()).await;

    if let Some(task) = admin_task {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
