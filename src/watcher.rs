//! Debounced filesystem watcher feeding the sync bridge.
//!
//! Watches directories recursively so paths that appear after startup are
//! picked up, and so editors that save via rename-then-recreate keep being
//! observed. Raw events are coalesced per path inside a quiet window before
//! they reach the handler.

use anyhow::{Context as _, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// Quiet window for coalescing multi-write save sequences.
pub const QUIET_WINDOW: Duration = Duration::from_millis(200);

/// File change event
#[derive(Debug, Clone)]
pub struct FileChange {
    /// Path to the changed file
    pub path: PathBuf,

    /// Type of change
    pub kind: ChangeKind,
}

/// Type of file change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// Debounced source of [`FileChange`] events for one session.
pub struct LocalWatcher {
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl LocalWatcher {
    /// Create a watcher that forwards coalesced events into `tx`.
    pub fn new(tx: UnboundedSender<FileChange>) -> Result<Self> {
        let debouncer = new_debouncer(
            QUIET_WINDOW,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(change) = debounced_event_to_change(event) {
                            let _ = tx.send(change);
                        }
                    }
                }
                Err(errors) => {
                    for err in errors {
                        warn!("watch error: {err}");
                    }
                }
            },
        )?;

        Ok(Self {
            debouncer: Some(debouncer),
        })
    }

    /// Watch a directory recursively.
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(debouncer) = &mut self.debouncer {
            debouncer
                .watch(path.as_ref(), RecursiveMode::Recursive)
                .with_context(|| format!("failed to watch: {}", path.as_ref().display()))?;
        }
        Ok(())
    }

    /// Watch a path, logging and skipping on failure instead of aborting.
    pub fn watch_best_effort(&mut self, path: impl AsRef<Path>) {
        if let Err(err) = self.watch(path.as_ref()) {
            warn!("skipping unwatchable path {}: {err}", path.as_ref().display());
        }
    }

    /// Stop watching. Called before transports are torn down so shutdown
    /// cannot race with freshly generated events.
    pub fn close(&mut self) {
        self.debouncer = None;
    }
}

fn debounced_event_to_change(debounced_event: DebouncedEvent) -> Option<FileChange> {
    let event = &debounced_event.event;
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Added,
        EventKind::Modify(_) => ChangeKind::Changed,
        EventKind::Remove(_) => ChangeKind::Removed,
        _ => return None,
    };

    // Rename events carry the destination last.
    let path = event.paths.last()?.clone();

    // Skip hidden files, editor swap files and temp files
    if let Some(name) = path.file_name() {
        let name_str = name.to_string_lossy();
        if name_str.starts_with('.') || name_str.contains('~') || name_str.ends_with(".tmp") {
            return None;
        }
    }

    Some(FileChange { path, kind })
}
