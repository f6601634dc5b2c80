//! WebSocket upgrade and per-connection loops.
//!
//! Each connection gets a bounded outbound channel; the write loop drains it
//! into the socket while the read loop dispatches client messages. Clients
//! receive events only for sessions they are subscribed to — starting an
//! analysis subscribes the connection automatically.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use bitebase_core::ids::SessionId;
use bitebase_runtime::AnalysisRequest;

use crate::state::AppState;

/// One connected WebSocket client.
pub struct ClientConnection {
    /// Connection id (`conn_<uuid>`).
    pub id: String,
    sender: mpsc::Sender<Arc<String>>,
    subscriptions: parking_lot::RwLock<HashSet<SessionId>>,
    drops: AtomicU64,
}

impl ClientConnection {
    /// Wrap an outbound channel.
    #[must_use]
    pub fn new(id: String, sender: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            sender,
            subscriptions: parking_lot::RwLock::new(HashSet::new()),
            drops: AtomicU64::new(0),
        }
    }

    /// Subscribe this connection to a session's events.
    pub fn subscribe(&self, session_id: SessionId) {
        let _ = self.subscriptions.write().insert(session_id);
    }

    /// Whether this connection wants events for the session.
    #[must_use]
    pub fn is_subscribed(&self, session_id: &SessionId) -> bool {
        self.subscriptions.read().contains(session_id)
    }

    /// Try to enqueue a frame; returns false (and counts a drop) when the
    /// client's channel is full.
    #[must_use]
    pub fn send(&self, json: Arc<String>) -> bool {
        match self.sender.try_send(json) {
            Ok(()) => true,
            Err(_) => {
                let _ = self.drops.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Total lifetime drops on this connection.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

/// `GET /ws` — upgrade to the event socket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = format!("conn_{}", uuid::Uuid::new_v4().simple());
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(state.settings.server.event_buffer);
    let conn = Arc::new(ClientConnection::new(id.clone(), tx));
    state.broadcast.add(Arc::clone(&conn)).await;
    debug!(conn_id = %id, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx
                .send(Message::Text(frame.as_str().to_owned().into()))
                .await
                .is_err()
            {
                return;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => handle_client_message(&state, &conn, text.as_str()),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {} // ping/pong/binary ignored
        }
    }

    state.broadcast.remove(&id).await;
    writer.abort();
    debug!(conn_id = %id, "websocket disconnected");
}

/// Dispatch one client frame.
fn handle_client_message(state: &AppState, conn: &Arc<ClientConnection>, text: &str) {
    let parsed: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            send_error(conn, &format!("invalid JSON: {e}"));
            return;
        }
    };

    match parsed.get("type").and_then(Value::as_str) {
        Some("start-analysis") => {
            let request: AnalysisRequest = match serde_json::from_value(parsed.clone()) {
                Ok(req) => req,
                Err(e) => {
                    send_error(conn, &format!("invalid start-analysis payload: {e}"));
                    return;
                }
            };
            if request.location.trim().is_empty() {
                send_error(conn, "location must not be empty");
                return;
            }

            // Subscribe before the run starts so no event is missed.
            let session = state.pipeline.create(request);
            conn.subscribe(session.id.clone());
            send_frame(
                conn,
                &json!({ "type": "analysis-accepted", "sessionId": session.id }),
            );
            state.pipeline.spawn_run(session.id);
        }
        Some("subscribe") => {
            let Some(raw_id) = parsed.get("sessionId").and_then(Value::as_str) else {
                send_error(conn, "subscribe requires sessionId");
                return;
            };
            let session_id = SessionId::new(raw_id);
            if state.store.get(&session_id).is_none() {
                send_error(conn, &format!("unknown session: {raw_id}"));
                return;
            }
            conn.subscribe(session_id.clone());
            send_frame(conn, &json!({ "type": "subscribed", "sessionId": session_id }));
        }
        Some(other) => send_error(conn, &format!("unknown message type: {other}")),
        None => send_error(conn, "message has no type field"),
    }
}

fn send_frame(conn: &Arc<ClientConnection>, frame: &Value) {
    if !conn.send(Arc::new(frame.to_string())) {
        warn!(conn_id = %conn.id, "dropping reply frame (channel full)");
    }
}

fn send_error(conn: &Arc<ClientConnection>, error: &str) {
    debug!(conn_id = %conn.id, error, "client message rejected");
    send_frame(conn, &json!({ "type": "error", "error": error }));
}
