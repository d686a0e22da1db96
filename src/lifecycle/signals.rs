//! OS signal handling.
//!
//! - SIGINT / SIGTERM → graceful shutdown (workers are stopped first)
//! - SIGHUP → immediate reconciliation cycle

use tokio::sync::mpsc;

use crate::config::watcher::ReloadTrigger;
use crate::lifecycle::Shutdown;

/// Translate OS signals into shutdown and reload requests until shutdown.
pub fn spawn_signal_listener(shutdown: Shutdown, reload_tx: mpsc::UnboundedSender<ReloadTrigger>) {
    tokio::spawn(async move {
        wait_for_shutdown_signal(reload_tx).await;
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal(reload_tx: mpsc::UnboundedSender<ReloadTrigger>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut hup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hup)) => (term, hup),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            _ = term.recv() => return,
            _ = hup.recv() => {
                tracing::info!("SIGHUP received, requesting reconciliation");
                let _ = reload_tx.send(ReloadTrigger::Signal);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(_reload_tx: mpsc::UnboundedSender<ReloadTrigger>) {
    let _ = tokio::signal::ctrl_c().await;
}
