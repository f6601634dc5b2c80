//! Streamable HTTP transport.
//!
//! Remote MCP servers are reached by POSTing each JSON-RPC message to the
//! server endpoint. The response is either a single `application/json`
//! message or a `text/event-stream` body carrying one or more messages;
//! both are buffered for [`Transport::recv`].
//!
//! Session continuity: the `Mcp-Session-Id` response header is captured and
//! replayed on every subsequent request, and the last SSE event id is sent
//! back as `Last-Event-ID` so the server can resume a dropped stream.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Transport;
use crate::types::{JsonRpcMessage, McpError};

/// A parsed `text/event-stream` event.
#[derive(Debug, Default)]
struct SseEvent {
    id: Option<String>,
    event: Option<String>,
    data: String,
}

/// Split a bounded SSE body into events.
///
/// Events are separated by blank lines; `data:` lines accumulate, comment
/// lines (leading `:`) and unknown fields are skipped.
fn parse_sse_events(body: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    for raw in body.split("\n\n") {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let mut event = SseEvent::default();
        let mut has_data = false;
        for line in raw.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.find(':') {
                Some(pos) => {
                    let value = &line[pos + 1..];
                    (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
                }
                None => (line, ""),
            };
            match field {
                "id" => event.id = Some(value.to_string()),
                "event" => event.event = Some(value.to_string()),
                "data" => {
                    if has_data {
                        event.data.push('\n');
                    }
                    event.data.push_str(value);
                    has_data = true;
                }
                _ => {}
            }
        }
        if has_data {
            events.push(event);
        }
    }
    events
}

/// HTTP/SSE transport to a remote MCP server.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: BTreeMap<String, String>,
    session_id: Option<String>,
    last_event_id: Option<String>,
    recv_buffer: std::collections::VecDeque<JsonRpcMessage>,
    connected: bool,
}

impl HttpTransport {
    /// Build a transport for the given endpoint base URL.
    pub fn new(
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| McpError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: url.trim_end_matches('/').to_string(),
            headers: headers.clone(),
            session_id: None,
            last_event_id: None,
            recv_buffer: std::collections::VecDeque::new(),
            connected: true,
        })
    }

    fn build_headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(value) = "application/json".parse() {
            let _ = headers.insert(reqwest::header::CONTENT_TYPE, value);
        }
        if let Ok(value) = "text/event-stream, application/json".parse() {
            let _ = headers.insert(reqwest::header::ACCEPT, value);
        }
        for (key, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(key.as_bytes()),
                reqwest::header::HeaderValue::from_str(value),
            ) {
                let _ = headers.insert(name, value);
            }
        }
        if let Some(ref session_id) = self.session_id {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(session_id) {
                let _ = headers.insert(
                    reqwest::header::HeaderName::from_static("mcp-session-id"),
                    value,
                );
            }
        }
        if let Some(ref last_id) = self.last_event_id {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(last_id) {
                let _ = headers.insert(
                    reqwest::header::HeaderName::from_static("last-event-id"),
                    value,
                );
            }
        }
        headers
    }

    /// Buffer messages out of an SSE body, tracking event ids.
    fn buffer_sse_body(&mut self, body: &str) {
        for event in parse_sse_events(body) {
            if let Some(id) = event.id {
                self.last_event_id = Some(id);
            }
            // Default SSE event type is "message"; skip anything else.
            let is_message = event.event.as_deref().is_none_or(|e| e == "message");
            if !is_message || event.data.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcMessage>(&event.data) {
                Ok(msg) => self.recv_buffer.push_back(msg),
                Err(e) => {
                    warn!(error = %e, data = event.data, "skipping unparseable SSE event");
                }
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), McpError> {
        if !self.connected {
            return Err(McpError::Closed);
        }

        debug!(endpoint = %self.endpoint, method = ?message.method, id = ?message.id, "POST json-rpc");

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.build_headers())
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    McpError::Transport(format!("request timed out: {e}"))
                } else {
                    McpError::Transport(format!("request failed: {e}"))
                }
            })?;

        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let class = if status.is_client_error() {
                "permanent"
            } else {
                "retryable"
            };
            return Err(McpError::Transport(format!(
                "{class} HTTP error: status {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| McpError::Transport(format!("failed to read response body: {e}")))?;

        if body.is_empty() {
            // Notifications get empty 2xx acknowledgements.
            return Ok(());
        }

        if content_type.contains("text/event-stream") {
            self.buffer_sse_body(&body);
        } else {
            match serde_json::from_str::<JsonRpcMessage>(&body) {
                Ok(msg) => self.recv_buffer.push_back(msg),
                Err(e) => {
                    return Err(McpError::Protocol(format!(
                        "response is not a JSON-RPC message: {e}"
                    )));
                }
            }
        }

        Ok(())
    }

    async fn recv(&mut self) -> Result<JsonRpcMessage, McpError> {
        if let Some(msg) = self.recv_buffer.pop_front() {
            return Ok(msg);
        }
        if !self.connected {
            return Err(McpError::Closed);
        }
        Err(McpError::Protocol(
            "no buffered messages; responses arrive via send()".to_string(),
        ))
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.connected = false;
        self.recv_buffer.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
