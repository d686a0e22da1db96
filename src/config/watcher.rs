//! Instance document watcher for hot reload.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Why a reconciliation cycle was requested outside the regular interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    /// The document changed on disk.
    FileChanged,
    /// SIGHUP.
    Signal,
}

/// Watches the instance document and requests a cycle when it changes.
///
/// Parsing happens in the control loop, not here: a broken edit must go
/// through the same error path as any other failed cycle.
pub struct DocumentWatcher {
    path: PathBuf,
    reload_tx: mpsc::UnboundedSender<ReloadTrigger>,
}

impl DocumentWatcher {
    pub fn new(path: &Path, reload_tx: mpsc::UnboundedSender<ReloadTrigger>) -> Self {
        Self {
            path: path.to_path_buf(),
            reload_tx,
        }
    }

    /// Start watching the file in a background thread.
    ///
    /// The parent directory is watched and events are filtered on the file
    /// name, so saves that replace the file through a rename keep working.
    /// The returned watcher must be kept alive for notifications to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.reload_tx.clone();
        let file_name: Option<OsString> = self.path.file_name().map(|n| n.to_os_string());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = event.kind.is_modify() || event.kind.is_create();
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref());
                    if relevant && ours {
                        tracing::info!("Instance document change detected");
                        let _ = tx.send(ReloadTrigger::FileChanged);
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, dir = ?dir, "Document watcher started");
        Ok(watcher)
    }
}
