//! Filesystem notifications for watch mode

use imgserve_core::{Error, Result};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Wake-ups for the runner.
///
/// Notifications carry no payload: the runner re-sweeps the directory on
/// each one. Bursts are coalesced into a single pending wake-up.
pub struct Notifications {
    rx: mpsc::Receiver<()>,
    _watcher: Option<RecommendedWatcher>,
}

impl Notifications {
    /// Wrap an existing channel
    pub fn from_channel(rx: mpsc::Receiver<()>) -> Self {
        Self { rx, _watcher: None }
    }

    /// Watch `dir` (non-recursively) for new or rewritten files
    pub fn watch(dir: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel(1);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if is_relevant(&event.kind) => {
                    debug!("Filesystem event: {:?} {:?}", event.kind, event.paths);
                    // Full means a wake-up is already pending
                    let _ = tx.try_send(());
                }
                Ok(_) => {}
                Err(e) => warn!("Filesystem watch error: {}", e),
            }
        })
        .map_err(|e| Error::config(format!("failed to create filesystem watcher: {}", e)))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::config(format!("failed to watch {}: {}", dir.display(), e)))?;

        Ok(Self {
            rx,
            _watcher: Some(watcher),
        })
    }

    /// Wait for the next wake-up; `None` once the sender is gone
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

// Moving a processed file out of the directory is not new input
fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
        EventKind::Create(_) | EventKind::Modify(_) => true,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        _ => false,
    }
}
