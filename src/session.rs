//! Session lifecycle: one replicated document + transport per interface.
//!
//! Each session owns its watcher, bridge task and suppression state; nothing
//! is shared between sessions so one interface can never suppress or observe
//! another's traffic.

use anyhow::{Context as _, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::bridge::{BridgeEvent, DiffLive, SyncBridge};
use crate::config::Interface;
use crate::diff;
use crate::doc::ReplicatedDoc;
use crate::git::GitQuery;
use crate::transport::Transport;
use crate::watcher::LocalWatcher;

/// Diff mode parameters resolved from the CLI and config.
#[derive(Debug, Clone)]
pub struct DiffRequest {
    pub base_ref: String,
}

/// Runtime binding of one interface declaration to a document, transport,
/// watcher and bridge.
pub struct Session {
    pub name: String,
    pub url: String,
    pub manager: bool,
    pub open: bool,
    doc: Arc<ReplicatedDoc>,
    watcher: LocalWatcher,
    transport: Option<Transport>,
    bridge_task: JoinHandle<()>,
    adapters: Vec<JoinHandle<()>>,
    _files_sub: yrs::Subscription,
}

impl Session {
    /// The session's replicated document, shared with its transport.
    pub fn doc(&self) -> &Arc<ReplicatedDoc> {
        &self.doc
    }
}

pub struct SessionManager {
    sessions: Vec<Session>,
}

impl SessionManager {
    /// Create one session per interface declaration, wire bridges and diff
    /// snapshots, and aggregate non-manager URLs into manager metadata.
    pub async fn start(
        root: &Path,
        signaling: &str,
        interfaces: Vec<Interface>,
        diff: Option<&DiffRequest>,
    ) -> Result<Self> {
        let git = match diff {
            Some(_) => Some(GitQuery::open(root)?),
            None => None,
        };

        let mut sessions = Vec::with_capacity(interfaces.len());
        for iface in interfaces {
            let session = start_session(root, signaling, iface, git.as_ref(), diff).await?;
            sessions.push(session);
        }

        // Managers get the {name -> url} table of every other interface so a
        // single aggregating surface can enumerate them.
        let listing: Vec<(String, String)> = sessions
            .iter()
            .filter(|s| !s.manager)
            .map(|s| (s.name.clone(), s.url.clone()))
            .collect();
        for session in sessions.iter().filter(|s| s.manager) {
            for (name, url) in &listing {
                session.doc.set_metadata(name, url);
            }
        }

        Ok(Self { sessions })
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Ordered teardown: stop watchers first so no new events are generated,
    /// then destroy transports. Individual failures never block the rest.
    pub async fn shutdown(mut self) {
        for session in &mut self.sessions {
            session.watcher.close();
        }
        for session in self.sessions {
            for adapter in session.adapters {
                adapter.abort();
            }
            session.bridge_task.abort();
            if let Some(transport) = session.transport {
                transport.destroy().await;
            }
            info!("session '{}' closed", session.name);
        }
    }
}

async fn start_session(
    root: &Path,
    signaling: &str,
    iface: Interface,
    git: Option<&GitQuery>,
    diff: Option<&DiffRequest>,
) -> Result<Session> {
    let iface = Arc::new(iface);
    let doc = Arc::new(ReplicatedDoc::new());

    // Random per-session token identifying the document on the transport;
    // never reused across sessions.
    let channel_id = Uuid::new_v4().simple().to_string();
    let url = connection_url(&iface.host, &channel_id, signaling, diff.is_some())?;

    // Diff mode snapshots base/head before any live traffic.
    let diff_live = match (git, diff) {
        (Some(git), Some(request)) => {
            let head_ref = git.current_branch()?;
            let snap = diff::snapshot(git, Some(&iface), root, &request.base_ref, &head_ref)?;
            for (path, content) in &snap.base {
                doc.set_base_file(path, content);
            }
            for (path, content) in &snap.head {
                doc.set_head_file(path, content);
            }
            doc.set_meta("diff-base", &snap.base_ref);
            doc.set_meta("diff-head", &snap.head_ref);
            snap.is_working_dir.then(|| DiffLive {
                changed: snap.changed,
            })
        }
        _ => None,
    };

    let (bridge_tx, bridge_rx) = mpsc::unbounded_channel();
    let mut adapters = Vec::new();

    // Watcher events -> bridge loop.
    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
    let mut watcher = LocalWatcher::new(watch_tx)?;
    watcher.watch_best_effort(root);
    {
        let tx = bridge_tx.clone();
        adapters.push(tokio::spawn(async move {
            while let Some(change) = watch_rx.recv().await {
                let _ = tx.send(BridgeEvent::Local(change));
            }
        }));
    }

    // Document observer -> bridge loop.
    let (doc_tx, mut doc_rx) = mpsc::unbounded_channel();
    let files_sub = doc.observe_files(doc_tx);
    {
        let tx = bridge_tx.clone();
        adapters.push(tokio::spawn(async move {
            while let Some(change) = doc_rx.recv().await {
                let _ = tx.send(BridgeEvent::Remote(change));
            }
        }));
    }

    // A failed peer connection leaves the session serving local state only.
    let transport = match Transport::connect(&channel_id, signaling, doc.clone()).await {
        Ok(transport) => Some(transport),
        Err(err) => {
            warn!("'{}': peer connection failed: {err}", iface.name);
            None
        }
    };

    let bridge = SyncBridge::new(
        iface.clone(),
        doc.clone(),
        root.to_path_buf(),
        bridge_tx,
        diff_live,
    );
    let bridge_task = tokio::spawn(bridge.run(bridge_rx));

    Ok(Session {
        name: iface.name.clone(),
        url,
        manager: iface.manager,
        open: iface.open,
        doc,
        watcher,
        transport,
        bridge_task,
        adapters,
        _files_sub: files_sub,
    })
}

/// `<host>?pipe=<channel-id>&signaling=<encoded-endpoint>[&mode=diff]`
pub fn connection_url(
    host: &str,
    channel_id: &str,
    signaling: &str,
    diff_mode: bool,
) -> Result<String> {
    let mut url = Url::parse(host).with_context(|| format!("invalid interface host '{host}'"))?;
    url.query_pairs_mut()
        .append_pair("pipe", channel_id)
        .append_pair("signaling", signaling);
    if diff_mode {
        url.query_pairs_mut().append_pair("mode", "diff");
    }
    Ok(url.to_string())
}
