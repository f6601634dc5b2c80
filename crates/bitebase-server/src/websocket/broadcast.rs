//! Event fan-out to connected WebSocket clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bitebase_core::events::AnalysisEvent;
use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;

/// Maximum total lifetime message drops before forcibly disconnecting a slow client.
const MAX_TOTAL_DROPS: u64 = 100;

/// Manages event broadcasting to connected clients.
pub struct BroadcastManager {
    /// Connected clients indexed by connection ID.
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
    /// Atomic counter tracking total connections (avoids read-locking for count queries).
    active_count: AtomicUsize,
}

impl BroadcastManager {
    /// Create a new broadcast manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        if conns.insert(connection.id.clone(), connection).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, connection_id: &str) {
        let mut conns = self.connections.write().await;
        if conns.remove(connection_id).is_some() {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Fan an analysis event out to every connection subscribed to its
    /// session, removing clients that have dropped too many messages.
    pub async fn broadcast(&self, event: &AnalysisEvent) {
        let session_id = event.session_id();
        let json = match serde_json::to_string(event) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
                return;
            }
        };
        let mut to_remove = Vec::new();
        {
            let conns = self.connections.read().await;
            let mut recipients = 0u32;
            for conn in conns.values() {
                if conn.is_subscribed(session_id) {
                    recipients += 1;
                    if !conn.send(Arc::clone(&json)) {
                        counter!("ws_broadcast_drops_total").increment(1);
                        let drops = conn.drop_count();
                        if drops >= MAX_TOTAL_DROPS {
                            warn!(conn_id = %conn.id, session = %session_id, drops, "disconnecting slow client");
                            to_remove.push(conn.id.clone());
                        } else {
                            warn!(conn_id = %conn.id, session = %session_id, total_drops = drops, "failed to send event to client (channel full)");
                        }
                    }
                }
            }
            debug!(
                event_type = event.event_type(),
                session = %session_id,
                recipients,
                "broadcast event"
            );
        }
        if !to_remove.is_empty() {
            let mut conns = self.connections.write().await;
            for id in &to_remove {
                if conns.remove(id).is_some() {
                    let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}
