//! Analysis lifecycle events.
//!
//! [`AnalysisEvent`] is the single event family the backend emits: it is
//! published on the runtime's broadcast hub, fanned out over WebSocket, and
//! replayed on per-session SSE streams. Events are transient and never
//! persisted.
//!
//! Wire shape: `{"type": "<kebab-case name>", "sessionId": ..., ...}` with
//! camelCase payload fields, matching what dashboard clients consume.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SessionId;

/// RFC 3339 timestamp with millisecond precision (`2026-01-01T00:00:00.000Z`).
#[must_use]
pub fn wire_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Events emitted over the lifetime of one analysis run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnalysisEvent {
    /// Analysis accepted and the pipeline is starting.
    #[serde(rename = "analysis-started")]
    AnalysisStarted {
        /// Session this event belongs to.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Event time, RFC 3339.
        timestamp: String,
        /// Agent names in execution order.
        agents: Vec<String>,
    },

    /// An agent stage reported progress.
    #[serde(rename = "agent-progress")]
    AgentProgress {
        /// Session this event belongs to.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Event time, RFC 3339.
        timestamp: String,
        /// Agent (stage) name.
        agent: String,
        /// Stage progress, 0–100.
        progress: u8,
        /// Optional human-readable status line.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// An agent stage finished and produced its partial result.
    #[serde(rename = "agent-completed")]
    AgentCompleted {
        /// Session this event belongs to.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Event time, RFC 3339.
        timestamp: String,
        /// Agent (stage) name.
        agent: String,
        /// Stage result payload.
        result: Value,
        /// Stage wall-clock duration in ms.
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },

    /// The whole pipeline finished and the report is available.
    #[serde(rename = "analysis-completed")]
    AnalysisCompleted {
        /// Session this event belongs to.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Event time, RFC 3339.
        timestamp: String,
        /// Assembled report.
        report: Value,
        /// Total run duration in ms.
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },

    /// The run ended early — stage failure or cancellation.
    #[serde(rename = "analysis-error")]
    AnalysisError {
        /// Session this event belongs to.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Event time, RFC 3339.
        timestamp: String,
        /// Agent that failed, when the error is stage-scoped.
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        /// Error message.
        error: String,
    },
}

impl AnalysisEvent {
    /// The session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::AnalysisStarted { session_id, .. }
            | Self::AgentProgress { session_id, .. }
            | Self::AgentCompleted { session_id, .. }
            | Self::AnalysisCompleted { session_id, .. }
            | Self::AnalysisError { session_id, .. } => session_id,
        }
    }

    /// Whether this event ends the run (no further events will follow).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AnalysisCompleted { .. } | Self::AnalysisError { .. }
        )
    }

    /// The wire name of this event (`agent-progress`, ...).
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AnalysisStarted { .. } => "analysis-started",
            Self::AgentProgress { .. } => "agent-progress",
            Self::AgentCompleted { .. } => "agent-completed",
            Self::AnalysisCompleted { .. } => "analysis-completed",
            Self::AnalysisError { .. } => "analysis-error",
        }
    }
}
