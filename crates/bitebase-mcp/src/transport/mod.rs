//! Message transports.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `stdio` | Child process, one JSON object per line over stdin/stdout |
//! | `http`  | Streamable HTTP: POST requests, JSON or SSE responses |

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;

use crate::types::{JsonRpcMessage, McpError};

/// A bidirectional JSON-RPC message channel to one MCP server.
///
/// Implementations are driven by [`crate::client::McpClient`], which owns
/// request/response correlation; a transport only moves frames.
#[async_trait]
pub trait Transport: Send {
    /// Send one message to the server.
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), McpError>;

    /// Receive the next message from the server.
    ///
    /// Returns [`McpError::Closed`] once the peer is gone.
    async fn recv(&mut self) -> Result<JsonRpcMessage, McpError>;

    /// Tear the connection down (stdio: kill the child process).
    async fn close(&mut self) -> Result<(), McpError>;

    /// Whether the transport still believes it is connected.
    fn is_connected(&self) -> bool;
}
