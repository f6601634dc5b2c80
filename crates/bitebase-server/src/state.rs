//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use bitebase_mcp::McpManager;
use bitebase_runtime::{AnalysisPipeline, EventHub, SessionStore};
use bitebase_settings::Settings;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::websocket::BroadcastManager;

/// Everything the handlers need, cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    /// Effective settings snapshot.
    pub settings: Arc<Settings>,
    /// MCP connection manager.
    pub manager: McpManager,
    /// Session registry.
    pub store: SessionStore,
    /// Analysis pipeline.
    pub pipeline: AnalysisPipeline,
    /// Event hub bridging the pipeline to subscribers.
    pub hub: EventHub,
    /// WebSocket fan-out.
    pub broadcast: Arc<BroadcastManager>,
    /// Prometheus render handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Wire up state around an existing manager.
    #[must_use]
    pub fn new(settings: Arc<Settings>, manager: McpManager) -> Self {
        let store = SessionStore::new();
        let hub = EventHub::new(settings.server.event_buffer);
        let pipeline = AnalysisPipeline::new(
            manager.clone(),
            store.clone(),
            hub.clone(),
            settings.pipeline.clone(),
        );
        Self {
            settings,
            manager,
            store,
            pipeline,
            hub,
            broadcast: Arc::new(BroadcastManager::new()),
            metrics: None,
            started_at: Instant::now(),
        }
    }

    /// Attach a Prometheus render handle for the `/metrics` route.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Option<PrometheusHandle>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Periodically drop finished sessions older than `max_age`.
    ///
    /// Keeps the in-memory store bounded on long-running deployments.
    pub fn spawn_session_purge(&self, max_age: chrono::Duration) {
        let store = self.store.clone();
        let period = std::time::Duration::from_secs(15 * 60);
        drop(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                let _ = interval.tick().await;
                let removed = store.purge_finished(max_age);
                if removed > 0 {
                    tracing::debug!(removed, "purged finished sessions");
                }
            }
        }));
    }

    /// Forward every hub event to the WebSocket broadcast manager.
    ///
    /// Runs until the process exits; a lagged bridge logs and keeps going.
    pub fn spawn_event_bridge(&self) {
        let mut rx = self.hub.subscribe();
        let broadcast = Arc::clone(&self.broadcast);
        drop(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => broadcast.broadcast(&event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event bridge lagged, events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        }));
    }
}
