//! Replicated document shared with remote interfaces.
//!
//! Wraps one `yrs::Doc` per session and exposes the named maps remote peers
//! read and mutate. Every local transaction is tagged with a local origin and
//! every update received from the transport is applied under a remote origin,
//! so observers can tell who authored a change without guessing.

use anyhow::{anyhow, Result};
use tokio::sync::mpsc::UnboundedSender;
use yrs::types::EntryChange;
use yrs::updates::decoder::Decode;
use yrs::{
    Doc, Map, MapRef, Observable, Origin, ReadTxn, StateVector, Subscription, Transact, Update,
};

/// Origin tag on transactions authored by this process.
pub const LOCAL_ORIGIN: &str = "filepipe:local";
/// Origin tag on transactions replaying updates received from a peer.
pub const REMOTE_ORIGIN: &str = "filepipe:remote";

/// Per-key change action reported to document observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocAction {
    Add(String),
    Update(String),
    Delete,
}

/// One observed change to the `files` map.
#[derive(Debug, Clone)]
pub struct DocChange {
    pub path: String,
    pub action: DocAction,
    /// True when the transaction carried this process's local origin tag.
    pub local_origin: bool,
}

/// One session's replicated document and its named maps.
pub struct ReplicatedDoc {
    doc: Doc,
    files: MapRef,
    data: MapRef,
    base_files: MapRef,
    head_files: MapRef,
    metadata: MapRef,
    meta: MapRef,
}

impl ReplicatedDoc {
    pub fn new() -> Self {
        let doc = Doc::new();
        let files = doc.get_or_insert_map("files");
        let data = doc.get_or_insert_map("data");
        let base_files = doc.get_or_insert_map("base-files");
        let head_files = doc.get_or_insert_map("head-files");
        let metadata = doc.get_or_insert_map("metadata");
        let meta = doc.get_or_insert_map("meta");
        Self {
            doc,
            files,
            data,
            base_files,
            head_files,
            metadata,
            meta,
        }
    }

    pub fn get_file(&self, path: &str) -> Option<String> {
        let txn = self.doc.transact();
        self.files.get(&txn, path).and_then(|v| v.cast::<String>().ok())
    }

    /// Write one file entry inside a single local-origin transaction.
    pub fn set_file(&self, path: &str, content: &str) {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        self.files.insert(&mut txn, path, content);
    }

    pub fn remove_file(&self, path: &str) {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        let _ = self.files.remove(&mut txn, path);
    }

    pub fn get_base_file(&self, path: &str) -> Option<String> {
        let txn = self.doc.transact();
        self.base_files.get(&txn, path).and_then(|v| v.cast::<String>().ok())
    }

    pub fn get_head_file(&self, path: &str) -> Option<String> {
        let txn = self.doc.transact();
        self.head_files.get(&txn, path).and_then(|v| v.cast::<String>().ok())
    }

    pub fn set_base_file(&self, path: &str, content: &str) {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        self.base_files.insert(&mut txn, path, content);
    }

    pub fn set_head_file(&self, path: &str, content: &str) {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        self.head_files.insert(&mut txn, path, content);
    }

    pub fn set_metadata(&self, key: &str, value: &str) {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        self.metadata.insert(&mut txn, key, value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<String> {
        let txn = self.doc.transact();
        self.metadata.get(&txn, key).and_then(|v| v.cast::<String>().ok())
    }

    pub fn set_meta(&self, key: &str, value: &str) {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        self.meta.insert(&mut txn, key, value);
    }

    pub fn set_data(&self, key: &str, value: &str) {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        self.data.insert(&mut txn, key, value);
    }

    pub fn get_data(&self, key: &str) -> Option<String> {
        let txn = self.doc.transact();
        self.data.get(&txn, key).and_then(|v| v.cast::<String>().ok())
    }

    /// Observe the `files` map, forwarding each per-key change into `tx`.
    /// The subscription must be kept alive for as long as events are wanted.
    pub fn observe_files(&self, tx: UnboundedSender<DocChange>) -> Subscription {
        let local: Origin = LOCAL_ORIGIN.into();
        self.files.observe(move |txn, event| {
            let local_origin = txn.origin() == Some(&local);
            for (key, change) in event.keys(txn).iter() {
                let action = match change {
                    EntryChange::Inserted(value) => {
                        DocAction::Add(value.clone().cast::<String>().unwrap_or_default())
                    }
                    EntryChange::Updated(_, value) => {
                        DocAction::Update(value.clone().cast::<String>().unwrap_or_default())
                    }
                    EntryChange::Removed(_) => DocAction::Delete,
                };
                let _ = tx.send(DocChange {
                    path: key.to_string(),
                    action,
                    local_origin,
                });
            }
        })
    }

    /// Observe outgoing document updates for the transport. Updates applied
    /// under the remote origin are skipped so received changes are not echoed
    /// straight back to the peer that sent them.
    pub fn observe_updates<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        let remote: Origin = REMOTE_ORIGIN.into();
        self.doc
            .observe_update_v1(move |txn, event| {
                if txn.origin() != Some(&remote) {
                    callback(event.update.clone());
                }
            })
            .map_err(|e| anyhow!("failed to observe document updates: {e}"))
    }

    /// Full document state as a single update, for the initial peer exchange.
    pub fn encode_full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Apply an update received from a peer, attributed to the remote origin.
    pub fn apply_remote_update(&self, bytes: &[u8]) -> Result<()> {
        let update =
            Update::decode_v1(bytes).map_err(|e| anyhow!("malformed document update: {e}"))?;
        let mut txn = self.doc.transact_mut_with(REMOTE_ORIGIN);
        txn.apply_update(update);
        Ok(())
    }
}

impl Default for ReplicatedDoc {
    fn default() -> Self {
        Self::new()
    }
}
