//! Directory watcher that turns filesystem changes into rescan requests.
//!
//! The watcher never touches the registry; it only tells the orchestrator
//! that the next tick should scan.

use notify_debouncer_mini::notify;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Events delivered to the orchestrator loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    RescanRequested,
}

/// Errors that can occur when starting a watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Not a directory: {0:?}")]
    NotADirectory(std::path::PathBuf),

    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Keeps the underlying watcher alive; dropping it stops watching.
pub struct DirectoryWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl DirectoryWatcher {
    /// Watches `dir` recursively, sending a rescan request per debounced batch of changes.
    pub fn start(
        dir: &Path,
        debounce: Duration,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Result<Self, WatchError> {
        if !dir.is_dir() {
            return Err(WatchError::NotADirectory(dir.to_path_buf()));
        }

        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
            Ok(changes) => {
                debug!(changes = changes.len(), "Directory changed");
                // The receiver is gone only during shutdown.
                let _ = events.send(MonitorEvent::RescanRequested);
            }
            Err(e) => warn!(error = %e, "Watcher error"),
        })?;

        debouncer
            .watcher()
            .watch(dir, notify::RecursiveMode::Recursive)?;

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

/// Drains every queued event; true if at least one rescan was requested.
pub fn drain_rescan_requests(events: &mut mpsc::UnboundedReceiver<MonitorEvent>) -> bool {
    let mut requested = false;
    while let Ok(event) = events.try_recv() {
        match event {
            MonitorEvent::RescanRequested => requested = true,
        }
    }
    requested
}
