//! Client side of the relay channel.
//!
//! Signals issued before the WebSocket has finished opening are queued and
//! flushed exactly once when it does, instead of being retried on a timer.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::protocol::{ClientEnvelope, ServerEnvelope};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay channel closed")]
    ChannelClosed,
    #[error("relay connect failed: {0}")]
    Connect(String),
}

/// The controller's view of the relay channel.
#[async_trait::async_trait]
pub trait RelayLink: Send + Sync {
    /// Queue an envelope for delivery. Never blocks; envelopes queued before
    /// the channel opens are flushed when it does.
    fn send(&self, envelope: ClientEnvelope) -> Result<(), RelayError>;

    /// Receive the next relayed envelope, or None when the channel is gone.
    async fn recv(&self) -> Option<ServerEnvelope>;
}

/// WebSocket connection to a running relay.
pub struct RelayClient {
    send_tx: mpsc::UnboundedSender<ClientEnvelope>,
    recv_rx: AsyncMutex<mpsc::UnboundedReceiver<ServerEnvelope>>,
    opened: Arc<Notify>,
    is_open: Arc<AtomicBool>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl RelayClient {
    /// Start connecting to `url` and return immediately.
    ///
    /// Sends issued while the connection is still being established sit in
    /// the outbound queue until the socket opens.
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        let url = url.into();
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<ClientEnvelope>();
        let (recv_tx, recv_rx) = mpsc::unbounded_channel::<ServerEnvelope>();
        let opened = Arc::new(Notify::new());
        let is_open = Arc::new(AtomicBool::new(false));

        let client = Arc::new(Self {
            send_tx,
            recv_rx: AsyncMutex::new(recv_rx),
            opened: opened.clone(),
            is_open: is_open.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        let connector = tokio::spawn(async move {
            let ws_stream = match connect_async(&url).await {
                Ok((ws, _)) => ws,
                Err(e) => {
                    // The channel either opens shortly after start or never
                    // will; queued envelopes die with the client.
                    warn!(url = %url, error = %e, "relay connect failed");
                    return;
                }
            };
            debug!(url = %url, "relay channel open");
            is_open.store(true, Ordering::SeqCst);
            opened.notify_waiters();

            let (mut ws_write, mut ws_read) = ws_stream.split();

            // Drain the queue; everything sent pre-open flushes here once.
            tokio::spawn(async move {
                while let Some(envelope) = send_rx.recv().await {
                    if let Ok(text) = serde_json::to_string(&envelope) {
                        if ws_write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
            });

            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerEnvelope>(&text) {
                            Ok(envelope) => {
                                if recv_tx.send(envelope).is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!(error = %e, "dropping unparseable relay frame"),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "relay websocket error");
                        break;
                    }
                }
            }
            debug!("relay channel closed");
        });

        client.tasks.lock().unwrap().push(connector);
        client
    }

    /// Wait until the channel has opened at least once.
    pub async fn wait_open(&self) {
        while !self.is_open.load(Ordering::SeqCst) {
            self.opened.notified().await;
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RelayLink for RelayClient {
    fn send(&self, envelope: ClientEnvelope) -> Result<(), RelayError> {
        self.send_tx
            .send(envelope)
            .map_err(|_| RelayError::ChannelClosed)
    }

    async fn recv(&self) -> Option<ServerEnvelope> {
        let mut rx = self.recv_rx.lock().await;
        rx.recv().await
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}

/// In-process relay with the same register/route semantics as the server,
/// used to wire two controllers together without a network.
pub struct LocalRelay {
    peers: Arc<AsyncMutex<HashMap<String, mpsc::UnboundedSender<ServerEnvelope>>>>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(AsyncMutex::new(HashMap::new())),
        }
    }

    /// Create a link behaving like one peer's relay connection.
    pub fn attach(&self) -> LocalRelayLink {
        let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientEnvelope>();
        let (server_tx, server_rx) = mpsc::unbounded_channel::<ServerEnvelope>();
        let peers = self.peers.clone();

        let task = tokio::spawn(async move {
            while let Some(envelope) = client_rx.recv().await {
                match envelope {
                    ClientEnvelope::Register { id } => {
                        peers.lock().await.insert(id, server_tx.clone());
                    }
                    ClientEnvelope::Signal { target, from, signal } => {
                        let guard = peers.lock().await;
                        if let Some(tx) = guard.get(&target) {
                            let _ = tx.send(ServerEnvelope::Signal { signal, from });
                        }
                        // Unknown target: silent drop, same as the relay.
                    }
                }
            }
        });

        LocalRelayLink {
            client_tx,
            server_rx: AsyncMutex::new(server_rx),
            _task: task,
        }
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LocalRelayLink {
    client_tx: mpsc::UnboundedSender<ClientEnvelope>,
    server_rx: AsyncMutex<mpsc::UnboundedReceiver<ServerEnvelope>>,
    _task: tokio::task::JoinHandle<()>,
}

#[async_trait::async_trait]
impl RelayLink for LocalRelayLink {
    fn send(&self, envelope: ClientEnvelope) -> Result<(), RelayError> {
        self.client_tx
            .send(envelope)
            .map_err(|_| RelayError::ChannelClosed)
    }

    async fn recv(&self) -> Option<ServerEnvelope> {
        let mut rx = self.server_rx.lock().await;
        rx.recv().await
    }
}

impl Drop for LocalRelayLink {
    fn drop(&mut self) {
        self._task.abort();
    }
}
