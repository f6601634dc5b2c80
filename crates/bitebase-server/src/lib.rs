//! # bitebase-server
//!
//! The externally visible surface of the BiteBase backend:
//!
//! - **HTTP** (`routes`): health, MCP status, analysis CRUD, per-session
//!   SSE event streams
//! - **WebSocket** (`websocket`): `start-analysis` / `subscribe` client
//!   messages, [`bitebase_core::events::AnalysisEvent`] fan-out
//!
//! ## Data Flow
//!
//! The pipeline publishes to the [`bitebase_runtime::EventHub`]; the event
//! bridge forwards every event to the WebSocket
//! [`websocket::BroadcastManager`], and SSE handlers subscribe to the hub
//! directly.

#![deny(unsafe_code)]

pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod websocket;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;

use tracing::info;

/// Serve the API on the given listener until `shutdown` resolves.
///
/// Starts the WebSocket event bridge alongside the HTTP server.
pub async fn serve(
    state: AppState,
    listener: tokio::net::TcpListener,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    state.spawn_event_bridge();
    info!(%addr, "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
