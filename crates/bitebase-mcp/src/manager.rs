//! Connection manager: registry, health checks, reconnect, routing.
//!
//! One [`McpManager`] owns every configured tool server. Responsibilities:
//!
//! - **Connect fan-out**: all enabled servers are connected concurrently;
//!   a server that fails to come up never blocks the others.
//! - **Health checks**: a periodic ping per connected server. Failures mark
//!   the server `Unhealthy` and kick off reconnection.
//! - **Reconnect**: bounded exponential backoff (5 attempts by default).
//!   Exhausting the budget parks the server in `Failed` until an explicit
//!   reconnect request.
//! - **Capability routing**: `call_with_capability` picks among servers
//!   declaring the capability, ordered by ascending lifetime error count,
//!   trying each candidate at most once.
//!
//! The manager is cheaply cloneable (`Arc` inner) so the server layer, the
//! pipeline, and background tasks share one instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use metrics::counter;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bitebase_core::ids::ServerId;
use bitebase_settings::{McpServerDef, McpSettings, TransportDef};

use crate::client::McpClient;
use crate::transport::{HttpTransport, StdioTransport, Transport};
use crate::types::{
    ManagerSnapshot, McpError, ServerHealth, ServerSnapshot, ServerStatus, ToolDescriptor,
};

// ─────────────────────────────────────────────────────────────────────────────
// Connector seam
// ─────────────────────────────────────────────────────────────────────────────

/// Opens a transport for a server definition.
///
/// The seam exists so tests can swap real process spawning / HTTP for
/// scripted transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to the given server.
    async fn open(
        &self,
        id: &ServerId,
        def: &McpServerDef,
    ) -> Result<Box<dyn Transport + Send>, McpError>;
}

/// Production connector: spawns stdio children, builds HTTP clients.
pub struct DefaultConnector {
    call_timeout: Duration,
}

impl DefaultConnector {
    /// Connector whose HTTP transports use the given request timeout.
    #[must_use]
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn open(
        &self,
        _id: &ServerId,
        def: &McpServerDef,
    ) -> Result<Box<dyn Transport + Send>, McpError> {
        match &def.transport {
            TransportDef::Stdio {
                command,
                args,
                env,
                cwd,
            } => Ok(Box::new(StdioTransport::spawn(
                command,
                args,
                env,
                cwd.as_deref(),
            )?)),
            TransportDef::Sse { url, headers } => {
                Ok(Box::new(HttpTransport::new(url, headers, self.call_timeout)?))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// State held per registered server.
struct ManagedServer {
    def: McpServerDef,
    health: ServerHealth,
    tools: Vec<ToolDescriptor>,
    /// Live client; `None` while disconnected. Each call locks the client's
    /// own mutex, so one slow tool call never blocks the registry.
    client: Option<Arc<Mutex<McpClient>>>,
    /// At most one reconnect task per server.
    reconnecting: bool,
}

struct ManagerInner {
    servers: RwLock<HashMap<ServerId, ManagedServer>>,
    settings: McpSettings,
    connector: Box<dyn Connector>,
    shutdown: CancellationToken,
}

/// The MCP connection manager. Clone freely; all clones share state.
#[derive(Clone)]
pub struct McpManager {
    inner: Arc<ManagerInner>,
}

impl McpManager {
    /// Build a manager from settings with the production connector.
    #[must_use]
    pub fn new(settings: McpSettings) -> Self {
        let call_timeout = Duration::from_secs(settings.call_timeout_secs);
        Self::with_connector(settings, Box::new(DefaultConnector::new(call_timeout)))
    }

    /// Build a manager with a custom connector (tests).
    #[must_use]
    pub fn with_connector(settings: McpSettings, connector: Box<dyn Connector>) -> Self {
        let servers = settings
            .servers
            .iter()
            .map(|(id, def)| {
                (
                    ServerId::new(id.clone()),
                    ManagedServer {
                        def: def.clone(),
                        health: ServerHealth::default(),
                        tools: Vec::new(),
                        client: None,
                        reconnecting: false,
                    },
                )
            })
            .collect();

        Self {
            inner: Arc::new(ManagerInner {
                servers: RwLock::new(servers),
                settings,
                connector,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.inner.settings.call_timeout_secs)
    }

    /// Connect every enabled server concurrently.
    ///
    /// Individual failures are recorded on the server and hand off to the
    /// background reconnect loop; they never abort the other connects.
    pub async fn connect_all(&self) {
        let ids: Vec<ServerId> = {
            let servers = self.inner.servers.read().await;
            servers
                .iter()
                .filter(|(_, s)| s.def.enabled)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let results = join_all(ids.iter().map(|id| self.connect(id))).await;
        for (id, result) in ids.into_iter().zip(results) {
            if let Err(e) = result {
                warn!(server = %id, error = %e, "initial connect failed, scheduling reconnect");
                self.spawn_reconnect(id);
            }
        }
    }

    /// One connect attempt: open transport, handshake, discover tools.
    pub async fn connect(&self, id: &ServerId) -> Result<(), McpError> {
        let def = {
            let mut servers = self.inner.servers.write().await;
            let server = servers
                .get_mut(id)
                .ok_or_else(|| McpError::ServerNotFound(id.clone()))?;
            if !server.def.enabled {
                return Err(McpError::Transport(format!(
                    "server {id} is disabled in configuration"
                )));
            }
            server.health.status = ServerStatus::Connecting;
            server.def.clone()
        };

        let attempt = async {
            let transport = self.inner.connector.open(id, &def).await?;
            let mut client = McpClient::new(transport, self.call_timeout());
            let info = client.initialize().await?;
            let tools = client.list_tools().await?;
            Ok::<_, McpError>((client, info, tools))
        };

        match attempt.await {
            Ok((client, info, tools)) => {
                info!(
                    server = %id,
                    name = %info.name,
                    tools = tools.len(),
                    "mcp server connected"
                );
                let mut servers = self.inner.servers.write().await;
                if let Some(server) = servers.get_mut(id) {
                    server.client = Some(Arc::new(Mutex::new(client)));
                    server.tools = tools;
                    server.health.status = ServerStatus::Connected;
                    server.health.consecutive_failures = 0;
                    server.health.connected_at = Some(chrono::Utc::now());
                    server.health.last_error = None;
                }
                Ok(())
            }
            Err(e) => {
                let mut servers = self.inner.servers.write().await;
                if let Some(server) = servers.get_mut(id) {
                    server.health.record_failure(e.to_string());
                    server.health.status = ServerStatus::Disconnected;
                    server.client = None;
                }
                Err(e)
            }
        }
    }

    /// Explicit reconnect request, e.g. for a `Failed` server.
    ///
    /// Makes one immediate attempt; on failure the bounded background loop
    /// takes over again.
    pub async fn reconnect(&self, id: &ServerId) -> Result<(), McpError> {
        self.close_client(id).await;
        match self.connect(id).await {
            Ok(()) => Ok(()),
            Err(e @ McpError::ServerNotFound(_)) => Err(e),
            Err(e) => {
                self.spawn_reconnect(id.clone());
                Err(e)
            }
        }
    }

    /// Spawn the bounded reconnect loop for a server, unless one is running.
    fn spawn_reconnect(&self, id: ServerId) {
        let manager = self.clone();
        drop(tokio::spawn(async move {
            {
                let mut servers = manager.inner.servers.write().await;
                let Some(server) = servers.get_mut(&id) else {
                    return;
                };
                if server.reconnecting {
                    return;
                }
                server.reconnecting = true;
            }
            manager.reconnect_loop(id).await;
        }));
    }

    async fn reconnect_loop(&self, id: ServerId) {
        let retry = self.inner.settings.reconnect.clone();
        for attempt in 1..=retry.max_attempts {
            let delay = retry.delay_for(attempt);
            tokio::select! {
                () = self.inner.shutdown.cancelled() => {
                    self.clear_reconnecting(&id).await;
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            counter!("mcp_reconnects_total").increment(1);
            debug!(server = %id, attempt, max = retry.max_attempts, "reconnect attempt");

            match self.connect(&id).await {
                Ok(()) => {
                    info!(server = %id, attempt, "reconnected");
                    self.clear_reconnecting(&id).await;
                    return;
                }
                Err(e) => {
                    warn!(server = %id, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }

        warn!(server = %id, attempts = retry.max_attempts, "reconnect budget exhausted, marking failed");
        let mut servers = self.inner.servers.write().await;
        if let Some(server) = servers.get_mut(&id) {
            server.health.status = ServerStatus::Failed;
            server.reconnecting = false;
        }
    }

    async fn clear_reconnecting(&self, id: &ServerId) {
        let mut servers = self.inner.servers.write().await;
        if let Some(server) = servers.get_mut(id) {
            server.reconnecting = false;
        }
    }

    async fn close_client(&self, id: &ServerId) {
        let client = {
            let mut servers = self.inner.servers.write().await;
            servers.get_mut(id).and_then(|s| s.client.take())
        };
        if let Some(client) = client {
            let _ = client.lock().await.close().await;
        }
    }

    /// Start the periodic health-check loop. Runs until shutdown.
    pub fn spawn_health_loop(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let period = Duration::from_secs(self.inner.settings.health_check_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it so a fresh server
            // is not pinged in the same instant it connected.
            interval.tick().await;
            loop {
                tokio::select! {
                    () = manager.inner.shutdown.cancelled() => return,
                    _ = interval.tick() => manager.health_check_pass().await,
                }
            }
        })
    }

    /// Ping every connected server once, concurrently.
    async fn health_check_pass(&self) {
        let targets: Vec<(ServerId, Arc<Mutex<McpClient>>)> = {
            let servers = self.inner.servers.read().await;
            servers
                .iter()
                .filter(|(_, s)| {
                    matches!(
                        s.health.status,
                        ServerStatus::Connected | ServerStatus::Unhealthy
                    )
                })
                .filter_map(|(id, s)| s.client.clone().map(|c| (id.clone(), c)))
                .collect()
        };

        let checks = targets.into_iter().map(|(id, client)| {
            let manager = self.clone();
            async move {
                let result = client.lock().await.ping().await;
                match result {
                    Ok(latency) => {
                        let mut servers = manager.inner.servers.write().await;
                        if let Some(server) = servers.get_mut(&id) {
                            server.health.record_success();
                            server.health.last_ping_ms = Some(latency.as_millis() as u64);
                        }
                    }
                    Err(e) => {
                        warn!(server = %id, error = %e, "health check failed");
                        let dead = e.is_connection_loss();
                        {
                            let mut servers = manager.inner.servers.write().await;
                            if let Some(server) = servers.get_mut(&id) {
                                server.health.record_failure(e.to_string());
                                server.health.status = ServerStatus::Unhealthy;
                                if dead {
                                    server.client = None;
                                }
                            }
                        }
                        manager.spawn_reconnect(id);
                    }
                }
            }
        });
        let _: Vec<()> = join_all(checks).await;
    }

    /// Call a tool on a specific server.
    pub async fn call_tool(
        &self,
        id: &ServerId,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, McpError> {
        let client = {
            let servers = self.inner.servers.read().await;
            let server = servers
                .get(id)
                .ok_or_else(|| McpError::ServerNotFound(id.clone()))?;
            server
                .client
                .clone()
                .ok_or_else(|| McpError::NotConnected(id.clone()))?
        };

        counter!("mcp_calls_total").increment(1);
        let result = client.lock().await.call_tool(tool, arguments).await;

        match result {
            Ok(value) => {
                let mut servers = self.inner.servers.write().await;
                if let Some(server) = servers.get_mut(id) {
                    server.health.record_success();
                }
                Ok(value)
            }
            Err(e) => {
                counter!("mcp_call_failures_total").increment(1);
                let dead = e.is_connection_loss();
                {
                    let mut servers = self.inner.servers.write().await;
                    if let Some(server) = servers.get_mut(id) {
                        server.health.record_failure(e.to_string());
                        if dead {
                            server.health.status = ServerStatus::Unhealthy;
                            server.client = None;
                        }
                    }
                }
                if dead {
                    self.spawn_reconnect(id.clone());
                }
                Err(e)
            }
        }
    }

    /// Call a tool on whichever server provides the capability.
    ///
    /// Candidates declare the capability and are `Connected` (preferred) or
    /// `Unhealthy` (degraded). They are tried in ascending lifetime
    /// error-count order, id as tiebreak, each at most once. Returns the
    /// serving server's id alongside the result.
    pub async fn call_with_capability(
        &self,
        capability: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<(ServerId, Value), McpError> {
        if capability.is_empty() {
            return Err(McpError::NoCapability(capability.to_string()));
        }

        let (declared, mut candidates) = {
            let servers = self.inner.servers.read().await;
            let declared = servers
                .iter()
                .filter(|(_, s)| {
                    s.def.enabled && s.def.capabilities.iter().any(|c| c == capability)
                })
                .count();
            let mut candidates: Vec<(ServerId, u8, u64)> = servers
                .iter()
                .filter(|(_, s)| {
                    s.def.enabled && s.def.capabilities.iter().any(|c| c == capability)
                })
                .filter_map(|(id, s)| match s.health.status {
                    ServerStatus::Connected => Some((id.clone(), 0, s.health.error_count)),
                    ServerStatus::Unhealthy => Some((id.clone(), 1, s.health.error_count)),
                    _ => None,
                })
                .collect();
            candidates.sort_by(|a, b| (a.1, a.2, &a.0).cmp(&(b.1, b.2, &b.0)));
            (declared, candidates)
        };

        if declared == 0 {
            return Err(McpError::NoCapability(capability.to_string()));
        }

        let mut failures: Vec<(ServerId, String)> = Vec::new();
        for (id, _, _) in candidates.drain(..) {
            match self.call_tool(&id, tool, arguments.clone()).await {
                Ok(value) => {
                    debug!(server = %id, capability, tool, "capability call served");
                    return Ok((id, value));
                }
                Err(e) => {
                    warn!(server = %id, capability, tool, error = %e, "candidate failed, trying next");
                    failures.push((id, e.to_string()));
                }
            }
        }

        if failures.is_empty() {
            // Declared but nothing routable right now.
            let servers = self.inner.servers.read().await;
            failures = servers
                .iter()
                .filter(|(_, s)| s.def.capabilities.iter().any(|c| c == capability))
                .map(|(id, s)| (id.clone(), format!("status {:?}", s.health.status)))
                .collect();
        }

        Err(McpError::AllCandidatesFailed {
            capability: capability.to_string(),
            failures,
        })
    }

    /// Serializable status of every server, ordered by id.
    pub async fn snapshot(&self) -> ManagerSnapshot {
        let servers = self.inner.servers.read().await;
        let mut list: Vec<ServerSnapshot> = servers
            .iter()
            .map(|(id, s)| ServerSnapshot {
                id: id.clone(),
                capabilities: s.def.capabilities.clone(),
                enabled: s.def.enabled,
                health: s.health.clone(),
                tools: s.tools.iter().map(|t| t.name.clone()).collect(),
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));

        ManagerSnapshot {
            total: list.len(),
            connected: list
                .iter()
                .filter(|s| s.health.status == ServerStatus::Connected)
                .count(),
            servers: list,
        }
    }

    /// Stop background tasks and close every connection.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let clients: Vec<(ServerId, Arc<Mutex<McpClient>>)> = {
            let mut servers = self.inner.servers.write().await;
            servers
                .iter_mut()
                .filter_map(|(id, s)| {
                    s.health.status = ServerStatus::Disconnected;
                    s.client.take().map(|c| (id.clone(), c))
                })
                .collect()
        };
        for (id, client) in clients {
            if let Err(e) = client.lock().await.close().await {
                debug!(server = %id, error = %e, "close during shutdown");
            }
        }
        info!("mcp manager shut down");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JsonRpcMessage;
    use bitebase_core::retry::RetryConfig;
    use serde_json::json;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Per-server scripted behavior shared between connector and transport.
    #[derive(Clone)]
    struct Behavior {
        name: String,
        fail_tool_calls: bool,
        die_on_call: bool,
        fail_pings: Arc<AtomicBool>,
        tool_calls: Arc<AtomicU32>,
        /// Fail this many connect attempts before succeeding
        /// (`u32::MAX` = always fail).
        fail_connects: u32,
    }

    impl Behavior {
        fn healthy(name: &str) -> Self {
            Self {
                name: name.to_string(),
                fail_tool_calls: false,
                die_on_call: false,
                fail_pings: Arc::new(AtomicBool::new(false)),
                tool_calls: Arc::new(AtomicU32::new(0)),
                fail_connects: 0,
            }
        }
    }

    /// Transport that answers every request inline from its behavior.
    struct ScriptedTransport {
        behavior: Behavior,
        queue: VecDeque<JsonRpcMessage>,
        connected: bool,
    }

    fn response(id: u64, result: Value) -> JsonRpcMessage {
        JsonRpcMessage {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::Number(id.into())),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, message: JsonRpcMessage) -> Result<(), McpError> {
            if !self.connected {
                return Err(McpError::Closed);
            }
            let Some(id) = message.numeric_id() else {
                return Ok(()); // notification
            };
            let method = message.method.clone().unwrap_or_default();
            let reply = match method.as_str() {
                "initialize" => response(
                    id,
                    json!({"serverInfo": {"name": self.behavior.name, "version": "0"}}),
                ),
                "tools/list" => response(
                    id,
                    json!({"tools": [{"name": "any_tool", "inputSchema": {}}]}),
                ),
                "tools/call" => {
                    let _ = self.behavior.tool_calls.fetch_add(1, Ordering::SeqCst);
                    if self.behavior.die_on_call {
                        self.connected = false;
                        return Err(McpError::Transport("connection reset".to_string()));
                    }
                    if self.behavior.fail_tool_calls {
                        JsonRpcMessage {
                            jsonrpc: "2.0".to_string(),
                            id: Some(Value::Number(id.into())),
                            method: None,
                            params: None,
                            result: None,
                            error: Some(crate::types::JsonRpcError {
                                code: -32000,
                                message: "tool exploded".to_string(),
                                data: None,
                            }),
                        }
                    } else {
                        response(id, json!({"servedBy": self.behavior.name}))
                    }
                }
                "ping" => {
                    if self.behavior.fail_pings.load(Ordering::SeqCst) {
                        return Err(McpError::Transport("ping failed".to_string()));
                    }
                    response(id, json!({}))
                }
                _ => response(id, json!({})),
            };
            self.queue.push_back(reply);
            Ok(())
        }

        async fn recv(&mut self) -> Result<JsonRpcMessage, McpError> {
            match self.queue.pop_front() {
                Some(msg) => Ok(msg),
                None => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn close(&mut self) -> Result<(), McpError> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    struct FakeConnector {
        behaviors: HashMap<String, Behavior>,
        attempts: Arc<std::sync::Mutex<HashMap<String, u32>>>,
    }

    impl FakeConnector {
        fn new(behaviors: Vec<Behavior>) -> Self {
            Self {
                behaviors: behaviors
                    .into_iter()
                    .map(|b| (b.name.clone(), b))
                    .collect(),
                attempts: Arc::default(),
            }
        }

        fn attempt_log(&self) -> Arc<std::sync::Mutex<HashMap<String, u32>>> {
            Arc::clone(&self.attempts)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn open(
            &self,
            id: &ServerId,
            _def: &McpServerDef,
        ) -> Result<Box<dyn Transport + Send>, McpError> {
            let behavior = self
                .behaviors
                .get(id.as_str())
                .cloned()
                .unwrap_or_else(|| Behavior::healthy(id.as_str()));

            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let entry = attempts.entry(id.as_str().to_string()).or_insert(0);
                *entry += 1;
                *entry
            };
            if attempt <= behavior.fail_connects {
                return Err(McpError::Transport("connect refused".to_string()));
            }

            Ok(Box::new(ScriptedTransport {
                behavior,
                queue: VecDeque::new(),
                connected: true,
            }))
        }
    }

    fn server_def(capabilities: &[&str], enabled: bool) -> McpServerDef {
        McpServerDef {
            transport: TransportDef::Stdio {
                command: "unused".to_string(),
                args: Vec::new(),
                env: BTreeMap::new(),
                cwd: None,
            },
            capabilities: capabilities.iter().map(|s| (*s).to_string()).collect(),
            enabled,
        }
    }

    fn settings(servers: Vec<(&str, McpServerDef)>) -> McpSettings {
        McpSettings {
            servers: servers
                .into_iter()
                .map(|(id, def)| (id.to_string(), def))
                .collect(),
            health_check_interval_secs: 30,
            call_timeout_secs: 1,
            reconnect: RetryConfig {
                max_attempts: 5,
                base_delay_ms: 1,
                max_delay_ms: 4,
            },
        }
    }

    async fn status_of(manager: &McpManager, id: &str) -> ServerStatus {
        let servers = manager.inner.servers.read().await;
        servers.get(&ServerId::new(id)).unwrap().health.status
    }

    async fn set_error_count(manager: &McpManager, id: &str, count: u64) {
        let mut servers = manager.inner.servers.write().await;
        servers
            .get_mut(&ServerId::new(id))
            .unwrap()
            .health
            .error_count = count;
    }

    async fn set_status(manager: &McpManager, id: &str, status: ServerStatus) {
        let mut servers = manager.inner.servers.write().await;
        servers.get_mut(&ServerId::new(id)).unwrap().health.status = status;
    }

    /// Poll until `probe` returns true or the deadline passes.
    async fn wait_for<F, Fut>(mut probe: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if probe().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within deadline");
    }

    #[tokio::test]
    async fn connect_all_isolates_failures() {
        let mut bad = Behavior::healthy("bad");
        bad.fail_connects = u32::MAX;
        let connector = FakeConnector::new(vec![Behavior::healthy("good"), bad]);
        let manager = McpManager::with_connector(
            settings(vec![
                ("good", server_def(&["web-scraping"], true)),
                ("bad", server_def(&["charting"], true)),
            ]),
            Box::new(connector),
        );

        manager.connect_all().await;

        assert_eq!(status_of(&manager, "good").await, ServerStatus::Connected);
        assert_ne!(status_of(&manager, "bad").await, ServerStatus::Connected);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_servers_are_registered_but_never_connected() {
        let connector = FakeConnector::new(vec![Behavior::healthy("off")]);
        let attempts = connector.attempt_log();
        let manager = McpManager::with_connector(
            settings(vec![("off", server_def(&["web-scraping"], false))]),
            Box::new(connector),
        );

        manager.connect_all().await;

        assert_eq!(status_of(&manager, "off").await, ServerStatus::Disconnected);
        assert!(attempts.lock().unwrap().is_empty());
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.connected, 0);
    }

    #[tokio::test]
    async fn connect_discovers_tools() {
        let connector = FakeConnector::new(vec![Behavior::healthy("s1")]);
        let manager = McpManager::with_connector(
            settings(vec![("s1", server_def(&["web-scraping"], true))]),
            Box::new(connector),
        );
        manager.connect_all().await;

        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.servers[0].tools, vec!["any_tool"]);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn capability_routing_prefers_lowest_error_count() {
        let connector = FakeConnector::new(vec![
            Behavior::healthy("alpha"),
            Behavior::healthy("beta"),
            Behavior::healthy("gamma"),
        ]);
        let manager = McpManager::with_connector(
            settings(vec![
                ("alpha", server_def(&["web-scraping"], true)),
                ("beta", server_def(&["web-scraping", "charting"], true)),
                ("gamma", server_def(&["charting"], true)),
            ]),
            Box::new(connector),
        );
        manager.connect_all().await;

        set_error_count(&manager, "alpha", 7).await;
        set_error_count(&manager, "beta", 2).await;

        let (served_by, result) = manager
            .call_with_capability("web-scraping", "any_tool", json!({}))
            .await
            .unwrap();
        assert_eq!(served_by.as_str(), "beta");
        assert_eq!(result["servedBy"], "beta");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn capability_routing_ties_break_on_id() {
        let connector =
            FakeConnector::new(vec![Behavior::healthy("zeta"), Behavior::healthy("alpha")]);
        let manager = McpManager::with_connector(
            settings(vec![
                ("zeta", server_def(&["data-analysis"], true)),
                ("alpha", server_def(&["data-analysis"], true)),
            ]),
            Box::new(connector),
        );
        manager.connect_all().await;

        let (served_by, _) = manager
            .call_with_capability("data-analysis", "any_tool", json!({}))
            .await
            .unwrap();
        assert_eq!(served_by.as_str(), "alpha");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn failed_servers_are_excluded_from_routing() {
        let excluded = Behavior::healthy("excluded");
        let excluded_calls = Arc::clone(&excluded.tool_calls);
        let connector = FakeConnector::new(vec![excluded, Behavior::healthy("live")]);
        let manager = McpManager::with_connector(
            settings(vec![
                ("excluded", server_def(&["web-scraping"], true)),
                ("live", server_def(&["web-scraping"], true)),
            ]),
            Box::new(connector),
        );
        manager.connect_all().await;

        // Give the excluded server a spotless record, then park it in Failed:
        // routing must still skip it.
        set_error_count(&manager, "live", 50).await;
        set_status(&manager, "excluded", ServerStatus::Failed).await;

        let (served_by, _) = manager
            .call_with_capability("web-scraping", "any_tool", json!({}))
            .await
            .unwrap();
        assert_eq!(served_by.as_str(), "live");
        assert_eq!(excluded_calls.load(Ordering::SeqCst), 0);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn each_candidate_is_tried_at_most_once() {
        let mut first = Behavior::healthy("first");
        first.fail_tool_calls = true;
        let mut second = Behavior::healthy("second");
        second.fail_tool_calls = true;
        let first_calls = Arc::clone(&first.tool_calls);
        let second_calls = Arc::clone(&second.tool_calls);

        let connector = FakeConnector::new(vec![first, second]);
        let manager = McpManager::with_connector(
            settings(vec![
                ("first", server_def(&["financial-datasets"], true)),
                ("second", server_def(&["financial-datasets"], true)),
            ]),
            Box::new(connector),
        );
        manager.connect_all().await;

        let err = manager
            .call_with_capability("financial-datasets", "any_tool", json!({}))
            .await
            .unwrap_err();
        match err {
            McpError::AllCandidatesFailed {
                capability,
                failures,
            } => {
                assert_eq!(capability, "financial-datasets");
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected AllCandidatesFailed, got {other:?}"),
        }
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_and_empty_capabilities_are_rejected() {
        let connector = FakeConnector::new(vec![Behavior::healthy("s1")]);
        let manager = McpManager::with_connector(
            settings(vec![("s1", server_def(&["web-scraping"], true))]),
            Box::new(connector),
        );
        manager.connect_all().await;

        let err = manager
            .call_with_capability("time-travel", "any_tool", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NoCapability(_)));

        let err = manager
            .call_with_capability("", "any_tool", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NoCapability(_)));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn rpc_failures_count_but_keep_server_connected() {
        let mut flaky = Behavior::healthy("flaky");
        flaky.fail_tool_calls = true;
        let connector = FakeConnector::new(vec![flaky]);
        let manager = McpManager::with_connector(
            settings(vec![("flaky", server_def(&["web-scraping"], true))]),
            Box::new(connector),
        );
        manager.connect_all().await;

        let err = manager
            .call_tool(&ServerId::new("flaky"), "any_tool", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Rpc { .. }));

        // An application-level error is not a connection loss.
        assert_eq!(status_of(&manager, "flaky").await, ServerStatus::Connected);
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.servers[0].health.error_count, 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn connection_loss_marks_unhealthy_and_reconnects() {
        let mut dying = Behavior::healthy("dying");
        dying.die_on_call = true;
        let connector = FakeConnector::new(vec![dying]);
        let attempts = connector.attempt_log();
        let manager = McpManager::with_connector(
            settings(vec![("dying", server_def(&["web-scraping"], true))]),
            Box::new(connector),
        );
        manager.connect_all().await;

        let err = manager
            .call_tool(&ServerId::new("dying"), "any_tool", json!({}))
            .await
            .unwrap_err();
        assert!(err.is_connection_loss());

        // The reconnect loop replaces the client; the fresh transport's
        // die_on_call only fires on tools/call, so it reconnects cleanly.
        let m = manager.clone();
        wait_for(|| {
            let m = m.clone();
            async move { status_of(&m, "dying").await == ServerStatus::Connected }
        })
        .await;
        assert!(*attempts.lock().unwrap().get("dying").unwrap() >= 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn reconnect_gives_up_after_max_attempts() {
        let mut unreachable = Behavior::healthy("gone");
        unreachable.fail_connects = u32::MAX;
        let connector = FakeConnector::new(vec![unreachable]);
        let attempts = connector.attempt_log();
        let manager = McpManager::with_connector(
            settings(vec![("gone", server_def(&["web-scraping"], true))]),
            Box::new(connector),
        );

        manager.connect_all().await;

        let m = manager.clone();
        wait_for(|| {
            let m = m.clone();
            async move { status_of(&m, "gone").await == ServerStatus::Failed }
        })
        .await;

        // 1 initial attempt from connect_all + exactly 5 from the loop.
        assert_eq!(*attempts.lock().unwrap().get("gone").unwrap(), 6);

        // Stays failed: no further attempts happen spontaneously.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*attempts.lock().unwrap().get("gone").unwrap(), 6);
        assert_eq!(status_of(&manager, "gone").await, ServerStatus::Failed);
    }

    #[tokio::test]
    async fn explicit_reconnect_revives_failed_server() {
        let mut flapping = Behavior::healthy("flap");
        flapping.fail_connects = 6; // initial + 5 loop attempts all fail
        let connector = FakeConnector::new(vec![flapping]);
        let manager = McpManager::with_connector(
            settings(vec![("flap", server_def(&["web-scraping"], true))]),
            Box::new(connector),
        );

        manager.connect_all().await;
        let m = manager.clone();
        wait_for(|| {
            let m = m.clone();
            async move { status_of(&m, "flap").await == ServerStatus::Failed }
        })
        .await;

        // Attempt 7 succeeds.
        manager.reconnect(&ServerId::new("flap")).await.unwrap();
        assert_eq!(status_of(&manager, "flap").await, ServerStatus::Connected);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn health_check_marks_unhealthy_on_ping_failure() {
        let sick = Behavior::healthy("sick");
        let fail_pings = Arc::clone(&sick.fail_pings);
        let connector = FakeConnector::new(vec![sick]);
        let manager = McpManager::with_connector(
            settings(vec![("sick", server_def(&["web-scraping"], true))]),
            Box::new(connector),
        );
        manager.connect_all().await;

        // Healthy pass records latency.
        manager.health_check_pass().await;
        let snapshot = manager.snapshot().await;
        assert!(snapshot.servers[0].health.last_ping_ms.is_some());
        assert_eq!(snapshot.servers[0].health.status, ServerStatus::Connected);

        fail_pings.store(true, Ordering::SeqCst);
        manager.health_check_pass().await;
        let snapshot = manager.snapshot().await;
        // Transport-classified ping failure drops the client for reconnect.
        assert_eq!(snapshot.servers[0].health.error_count, 1);

        // Reconnect replaces the client; pings still fail but the server
        // oscillates between Unhealthy and Connected rather than dying.
        fail_pings.store(false, Ordering::SeqCst);
        let m = manager.clone();
        wait_for(|| {
            let m = m.clone();
            async move { status_of(&m, "sick").await == ServerStatus::Connected }
        })
        .await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn snapshot_orders_servers_by_id() {
        let connector = FakeConnector::new(vec![
            Behavior::healthy("zeta"),
            Behavior::healthy("alpha"),
            Behavior::healthy("mid"),
        ]);
        let manager = McpManager::with_connector(
            settings(vec![
                ("zeta", server_def(&["a"], true)),
                ("alpha", server_def(&["b"], true)),
                ("mid", server_def(&["c"], true)),
            ]),
            Box::new(connector),
        );
        manager.connect_all().await;

        let snapshot = manager.snapshot().await;
        let ids: Vec<&str> = snapshot.servers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.connected, 3);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_disconnects_everything() {
        let connector = FakeConnector::new(vec![Behavior::healthy("s1")]);
        let manager = McpManager::with_connector(
            settings(vec![("s1", server_def(&["web-scraping"], true))]),
            Box::new(connector),
        );
        manager.connect_all().await;
        assert_eq!(manager.snapshot().await.connected, 1);

        manager.shutdown().await;
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.connected, 0);

        let err = manager
            .call_tool(&ServerId::new("s1"), "any_tool", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected(_)));
    }
}
