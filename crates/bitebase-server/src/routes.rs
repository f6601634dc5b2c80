//! HTTP routes: health, MCP status, analysis lifecycle, SSE streams.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use bitebase_core::events::{AnalysisEvent, wire_timestamp};
use bitebase_core::ids::{ServerId, SessionId};
use bitebase_mcp::McpError;
use bitebase_runtime::{AnalysisRequest, AnalysisSession, SessionStatus};

use crate::error::ApiError;
use crate::state::AppState;
use crate::websocket::ws_handler;

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/mcp/status", get(mcp_status))
        .route("/api/mcp/servers/{id}/reconnect", post(reconnect_server))
        .route("/api/analysis", post(create_analysis).get(list_analyses))
        .route("/api/analysis/{id}", get(get_analysis).delete(cancel_analysis))
        .route("/api/analysis/{id}/events", get(session_events))
        .route("/metrics", get(metrics_text))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /api/health`
async fn health(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.manager.snapshot().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "sessions": state.store.len(),
        "mcp": { "total": snapshot.total, "connected": snapshot.connected },
    }))
}

/// `GET /api/mcp/status`
async fn mcp_status(State(state): State<AppState>) -> Json<bitebase_mcp::types::ManagerSnapshot> {
    Json(state.manager.snapshot().await)
}

/// `POST /api/mcp/servers/{id}/reconnect`
///
/// Immediate attempt; on failure the bounded background loop takes over and
/// the response is `202` with the first error.
async fn reconnect_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let server_id = ServerId::new(id);
    match state.manager.reconnect(&server_id).await {
        Ok(()) => Ok(Json(json!({ "status": "connected", "server": server_id })).into_response()),
        Err(McpError::ServerNotFound(_)) => {
            Err(ApiError::NotFound(format!("unknown server: {server_id}")))
        }
        Err(e) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "retrying",
                "server": server_id,
                "error": e.to_string(),
            })),
        )
            .into_response()),
    }
}

/// `GET /metrics`
async fn metrics_text(State(state): State<AppState>) -> Result<String, ApiError> {
    state
        .metrics
        .as_ref()
        .map(metrics_exporter_prometheus::PrometheusHandle::render)
        .ok_or_else(|| ApiError::NotFound("metrics recorder not installed".into()))
}

/// `POST /api/analysis`
async fn create_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<AnalysisSession>), ApiError> {
    if request.location.trim().is_empty() {
        return Err(ApiError::BadRequest("location must not be empty".into()));
    }
    let session = state.pipeline.start(request);
    Ok((StatusCode::ACCEPTED, Json(session)))
}

/// `GET /api/analysis`
async fn list_analyses(State(state): State<AppState>) -> Json<Vec<AnalysisSession>> {
    Json(state.store.list())
}

/// `GET /api/analysis/{id}`
async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisSession>, ApiError> {
    let session_id = SessionId::new(id);
    state
        .store
        .get(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown session: {session_id}")))
}

/// `DELETE /api/analysis/{id}`
async fn cancel_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisSession>, ApiError> {
    let session_id = SessionId::new(id);
    let session = state.store.cancel(&session_id)?;
    Ok(Json(session))
}

/// `GET /api/analysis/{id}/events`
///
/// SSE stream of the session's events. Ends after a terminal event; an
/// already-finished session gets its terminal state replayed as a single
/// event.
async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>>, ApiError> {
    let session_id = SessionId::new(id);

    // Subscribe before the status check so an event landing in between is
    // buffered rather than lost.
    let mut hub_rx = state.hub.subscribe();
    let session = state
        .store
        .get(&session_id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown session: {session_id}")))?;

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(64);

    if session.status.is_terminal() {
        let _ = tx.send(Ok(sse_event(&terminal_event(&session)))).await;
    } else {
        drop(tokio::spawn(async move {
            loop {
                match hub_rx.recv().await {
                    Ok(event) if event.session_id() == &session_id => {
                        let terminal = event.is_terminal();
                        if tx.send(Ok(sse_event(&event))).await.is_err() {
                            return; // client went away
                        }
                        if terminal {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session = %session_id, skipped, "sse stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        }));
    }

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &AnalysisEvent) -> Event {
    match Event::default().event(event.event_type()).json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            warn!(error = %e, "failed to serialize SSE event");
            Event::default().comment("serialization error")
        }
    }
}

/// Reconstruct the terminal event for a session that already finished.
fn terminal_event(session: &AnalysisSession) -> AnalysisEvent {
    let duration_ms = (session.updated_at - session.created_at)
        .num_milliseconds()
        .max(0) as u64;
    match session.status {
        SessionStatus::Completed => AnalysisEvent::AnalysisCompleted {
            session_id: session.id.clone(),
            timestamp: wire_timestamp(),
            report: session.report.clone().unwrap_or(Value::Null),
            duration_ms,
        },
        _ => AnalysisEvent::AnalysisError {
            session_id: session.id.clone(),
            timestamp: wire_timestamp(),
            agent: None,
            error: session
                .error
                .clone()
                .unwrap_or_else(|| "analysis did not complete".to_string()),
        },
    }
}
