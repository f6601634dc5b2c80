//! Wire and state types for the MCP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use bitebase_core::ids::ServerId;

// ─────────────────────────────────────────────────────────────────────────────
// JSON-RPC framing
// ─────────────────────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 message: request, notification, or response.
///
/// One struct covers all three shapes; [`JsonRpcMessage::is_response`] and
/// [`JsonRpcMessage::is_notification`] classify incoming messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request/response id. Absent on notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name. Absent on responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Success result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    /// Build a request with a numeric id.
    #[must_use]
    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::Number(id.into())),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a notification (no id, no response expected).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// A response carries an id and either a result or an error.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none()
    }

    /// A notification carries a method but no id.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// Numeric id, when present and numeric.
    #[must_use]
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }
}

/// JSON-RPC error object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Server state
// ─────────────────────────────────────────────────────────────────────────────

/// Connection status of a managed server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Registered but not connected (initial state, or connection lost).
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Initialized and answering.
    Connected,
    /// Connected but failing health checks; degraded routing candidate.
    Unhealthy,
    /// Reconnect budget exhausted; excluded from routing until an explicit
    /// reconnect request.
    Failed,
}

/// Health bookkeeping for one server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealth {
    /// Current status.
    pub status: ServerStatus,
    /// Lifetime call/ping failures. Never reset; orders fallback routing.
    pub error_count: u64,
    /// Failures since the last success; reset on reconnect or success.
    pub consecutive_failures: u32,
    /// Round-trip of the most recent successful ping, ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping_ms: Option<u64>,
    /// When the current connection epoch started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// Most recent error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for ServerHealth {
    fn default() -> Self {
        Self {
            status: ServerStatus::Disconnected,
            error_count: 0,
            consecutive_failures: 0,
            last_ping_ms: None,
            connected_at: None,
            last_error: None,
        }
    }
}

impl ServerHealth {
    /// Record a successful call or ping.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        if self.status == ServerStatus::Unhealthy {
            self.status = ServerStatus::Connected;
        }
    }

    /// Record a failed call or ping.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.error_count += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error.into());
    }
}

/// A tool advertised by a server via `tools/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name, unique per server.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the tool arguments.
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// Server identity reported during the initialize handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    #[serde(default)]
    pub version: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Status snapshots (serialized by the /api/mcp/status route)
// ─────────────────────────────────────────────────────────────────────────────

/// Point-in-time view of one managed server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    /// Server id (configuration key).
    pub id: ServerId,
    /// Declared capability strings.
    pub capabilities: Vec<String>,
    /// Whether the server is enabled in configuration.
    pub enabled: bool,
    /// Health bookkeeping.
    #[serde(flatten)]
    pub health: ServerHealth,
    /// Names of tools discovered on connect.
    pub tools: Vec<String>,
}

/// Point-in-time view of the whole manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerSnapshot {
    /// Total registered servers.
    pub total: usize,
    /// Servers currently in [`ServerStatus::Connected`].
    pub connected: usize,
    /// Per-server detail, ordered by id.
    pub servers: Vec<ServerSnapshot>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from the MCP layer.
#[derive(Debug, Error)]
pub enum McpError {
    /// Spawning a stdio server process failed.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },

    /// Transport-level send/recv failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The per-call timeout elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The peer violated the protocol (bad frame, mismatched response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server returned a JSON-RPC error.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// No server with the given id is registered.
    #[error("unknown server: {0}")]
    ServerNotFound(ServerId),

    /// The server is registered but has no live connection.
    #[error("server {0} is not connected")]
    NotConnected(ServerId),

    /// No registered server declares the requested capability.
    #[error("no server provides capability {0:?}")]
    NoCapability(String),

    /// Every routing candidate failed; carries per-server failures.
    #[error(
        "all {} candidate(s) for capability {capability:?} failed: {}",
        failures.len(),
        failures
            .iter()
            .map(|(id, err)| format!("{id}: {err}"))
            .collect::<Vec<_>>()
            .join("; ")
    )]
    AllCandidatesFailed {
        /// The capability that was being routed.
        capability: String,
        /// `(server id, error message)` per attempted candidate.
        failures: Vec<(ServerId, String)>,
    },

    /// The transport (or the child process behind it) is gone.
    #[error("connection closed")]
    Closed,
}

impl McpError {
    /// Whether the underlying connection should be considered dead.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Closed | Self::Transport(_) | Self::Timeout(_))
    }
}
