use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::{ClientEnvelope, ServerEnvelope};
use crate::registry::{ConnectionId, Registry};

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<Registry>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Handle a single peer connection.
///
/// All failure handling is local to this task: a malformed frame or a
/// routing miss is dropped without touching other connections, and without
/// any error response to the sender.
async fn handle_socket(socket: WebSocket, registry: Arc<Registry>) {
    let conn = registry.connect();
    let (mut sender, mut receiver) = socket.split();

    // Channel the registry routes into; a task forwards it onto the socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEnvelope>();
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&envelope) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        debug!(conn, "outbound forwarder ended");
    });

    debug!(conn, "websocket connected");

    while let Some(msg_result) = receiver.next().await {
        let msg = match msg_result {
            Ok(m) => m,
            Err(e) => {
                debug!(conn, error = %e, "websocket error");
                break;
            }
        };

        match msg {
            Message::Text(text) => handle_frame(&registry, conn, &tx, &text),
            Message::Binary(data) => {
                // Some clients send JSON in binary frames; tolerate that.
                if let Ok(text) = String::from_utf8(data) {
                    handle_frame(&registry, conn, &tx, &text);
                } else {
                    debug!(conn, "dropping non-UTF8 binary frame");
                }
            }
            Message::Close(_) => break,
            // Ping/Pong are handled by axum.
            _ => {}
        }
    }

    registry.disconnect(conn);
    debug!(conn, "websocket disconnected");
}

fn handle_frame(
    registry: &Registry,
    conn: ConnectionId,
    tx: &mpsc::UnboundedSender<ServerEnvelope>,
    text: &str,
) {
    let envelope = match serde_json::from_str::<ClientEnvelope>(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(conn, error = %e, "dropping malformed envelope");
            return;
        }
    };

    match envelope {
        ClientEnvelope::Register { id } => {
            debug!(conn, id = %id, "registered");
            registry.register(conn, id, tx.clone());
        }
        ClientEnvelope::Signal { target, from, signal } => {
            let delivered = registry.route(&target, ServerEnvelope::Signal { signal, from });
            if !delivered {
                // Best-effort delivery: the sender gets no feedback.
                debug!(conn, target = %target, "routing miss, dropping signal");
            }
        }
    }
}
