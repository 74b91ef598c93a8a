//! WebSocket transport relaying document updates to the signaling endpoint.
//!
//! On connect the full document state is pushed once, then incremental
//! updates flow in both directions. A dropped connection is logged and the
//! session keeps operating locally; there is no automatic reconnection.

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::doc::ReplicatedDoc;

/// Handle for one live peer connection.
pub struct Transport {
    task: JoinHandle<()>,
    _update_sub: yrs::Subscription,
}

impl Transport {
    /// Connect the channel to the signaling endpoint and start relaying
    /// updates for `doc`.
    pub async fn connect(
        channel_id: &str,
        signaling: &str,
        doc: Arc<ReplicatedDoc>,
    ) -> Result<Self> {
        let mut url = Url::parse(signaling).map_err(|e| anyhow!("invalid signaling url: {e}"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("signaling url cannot carry a channel path"))?
            .push(channel_id);

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!("connected to {url}");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        // Initial full-state exchange, then live updates via the observer.
        let _ = out_tx.send(doc.encode_full_state());
        let update_sub = doc.observe_updates(move |update| {
            let _ = out_tx.send(update);
        })?;

        let doc_for_task = doc.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(update) => {
                            if ws_tx.send(Message::Binary(update.into())).await.is_err() {
                                warn!("peer connection lost while sending");
                                break;
                            }
                        }
                        None => break,
                    },
                    incoming = ws_rx.next() => match incoming {
                        Some(Ok(Message::Binary(bin))) => {
                            if let Err(err) = doc_for_task.apply_remote_update(&bin) {
                                warn!("dropping bad peer update: {err}");
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("peer connection closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("peer connection error: {err}");
                            break;
                        }
                    },
                }
            }
        });

        Ok(Self {
            task,
            _update_sub: update_sub,
        })
    }

    /// Tear the connection down. Errors during teardown are swallowed.
    pub async fn destroy(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}
