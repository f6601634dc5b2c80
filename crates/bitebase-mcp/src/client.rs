//! MCP client: handshake, tool discovery, tool calls, ping.
//!
//! Owns request/response correlation over a [`Transport`]: ids are
//! monotonically increasing integers, responses are matched by id, and
//! server-initiated notifications are skipped. Every request races a
//! per-call timeout so a wedged server cannot stall a pipeline stage.

use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::debug;

use crate::transport::Transport;
use crate::types::{JsonRpcMessage, McpError, ServerInfo, ToolDescriptor};

/// MCP protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// A connected MCP client over any transport.
pub struct McpClient {
    transport: Box<dyn Transport + Send>,
    next_id: u64,
    call_timeout: Duration,
    server_info: Option<ServerInfo>,
}

impl McpClient {
    /// Wrap a transport. The connection is unusable until
    /// [`McpClient::initialize`] has completed.
    #[must_use]
    pub fn new(transport: Box<dyn Transport + Send>, call_timeout: Duration) -> Self {
        Self {
            transport,
            next_id: 0,
            call_timeout,
            server_info: None,
        }
    }

    /// Server identity from the initialize handshake.
    #[must_use]
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Whether the underlying transport is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Run the `initialize` handshake and confirm with
    /// `notifications/initialized`.
    pub async fn initialize(&mut self) -> Result<ServerInfo, McpError> {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "clientInfo": {
                        "name": "bitebase",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {},
                })),
            )
            .await?;

        let info = match result.get("serverInfo") {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| McpError::Protocol(format!("bad serverInfo: {e}")))?,
            None => ServerInfo {
                name: "unknown".to_string(),
                version: String::new(),
            },
        };

        self.transport
            .send(JsonRpcMessage::notification(
                "notifications/initialized",
                None,
            ))
            .await?;

        debug!(server = %info.name, version = %info.version, "mcp handshake complete");
        self.server_info = Some(info.clone());
        Ok(info)
    }

    /// Discover the server's tools, following `nextCursor` pagination.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;

            let page: Vec<ToolDescriptor> = match result.get("tools") {
                Some(raw) => serde_json::from_value(raw.clone())
                    .map_err(|e| McpError::Protocol(format!("bad tools/list result: {e}")))?,
                None => Vec::new(),
            };
            tools.extend(page);

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
    }

    /// Invoke one tool with the given arguments.
    ///
    /// A `tools/call` result flagged `isError: true` is surfaced as an
    /// [`McpError::Rpc`] carrying the result's text content.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let result = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;

        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(McpError::Rpc {
                code: -1,
                message: extract_text_content(&result)
                    .unwrap_or_else(|| format!("tool {name} reported an error")),
            });
        }
        Ok(result)
    }

    /// Liveness probe; returns round-trip latency.
    pub async fn ping(&mut self) -> Result<Duration, McpError> {
        let start = Instant::now();
        let _ = self.request("ping", None).await?;
        Ok(start.elapsed())
    }

    /// Close the underlying transport (stdio: kill the child).
    pub async fn close(&mut self) -> Result<(), McpError> {
        self.transport.close().await
    }

    /// Send a request and wait for its response, racing the call timeout.
    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        self.next_id += 1;
        let id = self.next_id;
        let timeout = self.call_timeout;

        let exchange = async {
            self.transport
                .send(JsonRpcMessage::request(id, method, params))
                .await?;

            loop {
                let msg = self.transport.recv().await?;
                if msg.is_notification() {
                    debug!(method = ?msg.method, "skipping server notification");
                    continue;
                }
                match msg.numeric_id() {
                    Some(got) if got == id => {
                        if let Some(err) = msg.error {
                            return Err(McpError::Rpc {
                                code: err.code,
                                message: err.message,
                            });
                        }
                        return Ok(msg.result.unwrap_or(Value::Null));
                    }
                    other => {
                        // Stale response from an earlier timed-out request.
                        debug!(expected = id, got = ?other, "skipping mismatched response");
                    }
                }
            }
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| McpError::Timeout(timeout))?
    }
}

/// Pull the first `text` content block out of a `tools/call` result.
fn extract_text_content(result: &Value) -> Option<String> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find_map(|block| {
            (block.get("type")?.as_str()? == "text")
                .then(|| block.get("text")?.as_str().map(str::to_string))
                .flatten()
        })
}
