use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::ServerEnvelope;

/// Identifies a live WebSocket connection for the lifetime of the process.
pub type ConnectionId = u64;

struct RegisteredPeer {
    conn: ConnectionId,
    tx: mpsc::UnboundedSender<ServerEnvelope>,
}

/// Identifier -> channel map shared by all connection handlers.
///
/// Constructed once at startup and handed to the accept handler as axum
/// state. A later registration for an identifier silently supersedes the
/// previous association; the stale channel stays open but is no longer
/// routable under that identifier.
pub struct Registry {
    peers: DashMap<String, RegisteredPeer>,
    /// Reverse index so disconnect cleanup does not scan every record.
    by_conn: DashMap<ConnectionId, Vec<String>>,
    next_conn: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            by_conn: DashMap::new(),
            next_conn: AtomicU64::new(1),
        }
    }

    /// Admit a new connection. No side effect until it registers.
    pub fn connect(&self) -> ConnectionId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Associate `id` with `conn`, replacing any prior association.
    pub fn register(
        &self,
        conn: ConnectionId,
        id: String,
        tx: mpsc::UnboundedSender<ServerEnvelope>,
    ) {
        if let Some(previous) = self.peers.insert(id.clone(), RegisteredPeer { conn, tx }) {
            if previous.conn != conn {
                debug!(id = %id, old_conn = previous.conn, new_conn = conn, "registration superseded");
                if let Some(mut ids) = self.by_conn.get_mut(&previous.conn) {
                    ids.retain(|existing| existing != &id);
                }
            }
        }
        let mut ids = self.by_conn.entry(conn).or_default();
        if !ids.iter().any(|existing| existing == &id) {
            ids.push(id);
        }
    }

    /// Forward `envelope` to `target`. Returns false on a routing miss or a
    /// closed channel; the caller must not report either back to the sender.
    pub fn route(&self, target: &str, envelope: ServerEnvelope) -> bool {
        match self.peers.get(target) {
            Some(peer) => peer.tx.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Remove every record still owned by the closing connection.
    ///
    /// A record superseded by a later registration belongs to the newer
    /// connection and survives the old channel's close.
    pub fn disconnect(&self, conn: ConnectionId) {
        if let Some((_, ids)) = self.by_conn.remove(&conn) {
            for id in ids {
                self.peers.remove_if(&id, |_, peer| peer.conn == conn);
            }
        }
    }

    pub fn registered_count(&self) -> usize {
        self.peers.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
