//! The reconciliation core: loop-suppressed, permission-gated propagation
//! between local disk and the replicated document.
//!
//! One bridge per session. All state lives inside a single event-loop task;
//! watcher callbacks, document observers and debounce timers only send into
//! its channel, so handlers run to completion without locks.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Interface;
use crate::doc::{DocAction, DocChange, ReplicatedDoc};
use crate::permissions::Permission;
use crate::watcher::{ChangeKind, FileChange, QUIET_WINDOW};

/// Everything the bridge event loop reacts to.
#[derive(Debug)]
pub enum BridgeEvent {
    /// Filesystem event from the local watcher.
    Local(FileChange),
    /// Local quiet window closed for a path.
    LocalQuiet(String),
    /// Per-key change observed on the document's `files` map.
    Remote(DocChange),
    /// Remote quiet window closed for a path.
    RemoteQuiet(String),
}

pub type Fingerprint = [u8; 32];

pub fn fingerprint(content: &str) -> Fingerprint {
    Sha256::digest(content.as_bytes()).into()
}

/// Records one expected filesystem echo per path after a remote-triggered
/// disk write. A record is consumed by the next local event for its path and
/// only suppresses propagation when the on-disk fingerprint still matches and
/// the record is fresh.
#[derive(Default)]
pub struct SuppressionTable {
    records: HashMap<String, (Fingerprint, Instant)>,
}

impl SuppressionTable {
    /// Two unrelated edits racing a remote write should not be silenced, so
    /// records expire quickly.
    pub const VALIDITY: Duration = Duration::from_secs(2);

    pub fn record(&mut self, path: &str, fp: Fingerprint) {
        self.records.insert(path.to_string(), (fp, Instant::now()));
    }

    /// Remove the record for `path` and report whether it still justifies
    /// skipping propagation of content with fingerprint `fp`.
    pub fn consume(&mut self, path: &str, fp: &Fingerprint) -> bool {
        match self.records.remove(path) {
            Some((recorded, at)) => recorded == *fp && at.elapsed() < Self::VALIDITY,
            None => false,
        }
    }

    pub fn forget(&mut self, path: &str) {
        self.records.remove(path);
    }
}

/// Per-path debounce timers; scheduling a key cancels and replaces any timer
/// already pending for it.
#[derive(Default)]
struct DebounceMap {
    timers: HashMap<String, JoinHandle<()>>,
}

impl DebounceMap {
    fn schedule(
        &mut self,
        path: &str,
        tx: &UnboundedSender<BridgeEvent>,
        make: fn(String) -> BridgeEvent,
    ) {
        let tx = tx.clone();
        let key = path.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(QUIET_WINDOW).await;
            let _ = tx.send(make(key));
        });
        if let Some(previous) = self.timers.insert(path.to_string(), handle) {
            previous.abort();
        }
    }

    fn fired(&mut self, path: &str) {
        self.timers.remove(path);
    }
}

/// Live head-map refresh state when diff mode follows the working directory.
pub struct DiffLive {
    pub changed: BTreeSet<String>,
}

pub struct SyncBridge {
    iface: Arc<Interface>,
    doc: Arc<ReplicatedDoc>,
    root: PathBuf,
    tx: UnboundedSender<BridgeEvent>,
    suppress: SuppressionTable,
    local_timers: DebounceMap,
    remote_timers: DebounceMap,
    diff: Option<DiffLive>,
}

impl SyncBridge {
    pub fn new(
        iface: Arc<Interface>,
        doc: Arc<ReplicatedDoc>,
        root: PathBuf,
        tx: UnboundedSender<BridgeEvent>,
        diff: Option<DiffLive>,
    ) -> Self {
        Self {
            iface,
            doc,
            root,
            tx,
            suppress: SuppressionTable::default(),
            local_timers: DebounceMap::default(),
            remote_timers: DebounceMap::default(),
            diff,
        }
    }

    pub async fn run(mut self, mut rx: UnboundedReceiver<BridgeEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
    }

    pub async fn handle(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Local(change) => self.on_local_event(change),
            BridgeEvent::LocalQuiet(path) => self.on_local_quiet(path).await,
            BridgeEvent::Remote(change) => self.on_document_change(change),
            BridgeEvent::RemoteQuiet(path) => self.on_remote_quiet(path).await,
        }
    }

    fn on_local_event(&mut self, change: FileChange) {
        let Some(path) = self.relative(&change.path) else {
            return;
        };
        match change.kind {
            // Deletions are propagated into the document so remote interfaces
            // see the entry disappear; see DESIGN.md for the policy choice.
            ChangeKind::Removed => {
                self.suppress.forget(&path);
                if self.iface.allows(&path, Permission::Read) {
                    debug!("{}: local removal of {path}", self.iface.name);
                    self.doc.remove_file(&path);
                    if let Some(diff) = &self.diff {
                        if diff.changed.contains(&path) {
                            self.doc.set_head_file(&path, "");
                        }
                    }
                }
            }
            ChangeKind::Added | ChangeKind::Changed => {
                self.local_timers
                    .schedule(&path, &self.tx, BridgeEvent::LocalQuiet);
            }
        }
    }

    async fn on_local_quiet(&mut self, path: String) {
        self.local_timers.fired(&path);

        let content = match tokio::fs::read_to_string(self.root.join(&path)).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // The file vanished inside the quiet window; the removal
                // event will follow on its own.
                return;
            }
            Err(err) => {
                warn!("{}: cannot read {path}: {err}", self.iface.name);
                return;
            }
        };

        // Loop breaking: an echo of a remote-triggered write is a no-op.
        if self.suppress.consume(&path, &fingerprint(&content)) {
            debug!("{}: suppressed echo for {path}", self.iface.name);
            return;
        }

        if !self.iface.allows(&path, Permission::Read) {
            debug!("{}: no read permission for {path}, dropped", self.iface.name);
            return;
        }

        // Idempotence: never rewrite an identical document value.
        if self.doc.get_file(&path).as_deref() == Some(content.as_str()) {
            return;
        }

        self.doc.set_file(&path, &content);
        debug!("{}: published {path} ({} bytes)", self.iface.name, content.len());

        if let Some(diff) = &self.diff {
            if diff.changed.contains(&path) {
                self.doc.set_head_file(&path, &content);
            }
        }
    }

    fn on_document_change(&mut self, change: DocChange) {
        // Authored by this process; propagating it back would echo.
        if change.local_origin {
            return;
        }
        match change.action {
            DocAction::Delete => {
                // Remote deletions are acknowledged but never applied to
                // disk; see DESIGN.md.
                info!(
                    "{}: remote delete for {} ignored",
                    self.iface.name, change.path
                );
            }
            DocAction::Add(_) | DocAction::Update(_) => {
                if !self.iface.allows(&change.path, Permission::Write) {
                    warn!(
                        "{}: no write permission for {}, remote update dropped",
                        self.iface.name, change.path
                    );
                    return;
                }
                // Separately keyed from local timers so the two directions
                // cannot cancel each other.
                self.remote_timers
                    .schedule(&change.path, &self.tx, BridgeEvent::RemoteQuiet);
            }
        }
    }

    async fn on_remote_quiet(&mut self, path: String) {
        self.remote_timers.fired(&path);

        // Read the document's value at quiet time, not at event time: only
        // the final state of a burst matters.
        let Some(content) = self.doc.get_file(&path) else {
            return;
        };

        let absolute = self.root.join(&path);
        match tokio::fs::read_to_string(&absolute).await {
            Ok(on_disk) if on_disk == content => return,
            Ok(_) => {}
            // Absence just means this write creates the file.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                // Unreadable content must not be mistaken for empty and
                // overwritten.
                warn!("{}: cannot read {path}: {err}", self.iface.name);
                return;
            }
        }

        if let Err(err) = self.write_to_disk(&absolute, &content).await {
            warn!("{}: cannot write {path}: {err}", self.iface.name);
            return;
        }
        // Recorded immediately after the write so the next local event for
        // this path is recognized as our own echo.
        self.suppress.record(&path, fingerprint(&content));
        debug!("{}: applied remote update to {path}", self.iface.name);
    }

    async fn write_to_disk(&self, absolute: &std::path::Path, content: &str) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(absolute, content).await?;
        Ok(())
    }

    fn relative(&self, path: &std::path::Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    }
}
