//! In-memory session registry.
//!
//! Sessions exist only for the lifetime of the process. The store keeps an
//! insertion-ordered index next to the map so listings are stable without
//! re-sorting on every call.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use bitebase_core::ids::SessionId;
use bitebase_settings::StageDef;

/// Lifecycle of an analysis session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, pipeline not yet started.
    Pending,
    /// Pipeline executing.
    Running,
    /// All stages finished; report available.
    Completed,
    /// A stage failed.
    Failed,
    /// Cancelled by the client.
    Cancelled,
}

impl SessionStatus {
    /// Terminal statuses never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Per-stage execution state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not reached yet.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Errored; the run stopped here.
    Failed,
}

/// What a client asks to be analyzed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Target location (city, neighborhood, address).
    pub location: String,
    /// Cuisine or concept under consideration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    /// Free-form research question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// One stage of one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    /// Agent (stage) name.
    pub agent: String,
    /// Current status.
    pub status: StageStatus,
    /// Stage progress, 0–100.
    pub progress: u8,
    /// Relative contribution to overall progress.
    pub weight: u32,
    /// Server that served the stage, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_by: Option<String>,
    /// When execution started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure message, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageState {
    fn from_def(def: &StageDef) -> Self {
        Self {
            agent: def.agent.clone(),
            status: StageStatus::Pending,
            progress: 0,
            weight: def.weight.max(1),
            served_by: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// One analysis run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSession {
    /// Session id.
    pub id: SessionId,
    /// The request that started the run.
    pub request: AnalysisRequest,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Stage states, in execution order.
    pub stages: Vec<StageState>,
    /// Weight-averaged overall progress, 0–100.
    pub progress: u8,
    /// Final report; present iff completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
    /// Run-level error, when failed or cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl AnalysisSession {
    /// Recompute overall progress from stage progress and weights.
    pub fn recompute_progress(&mut self) {
        let total_weight: u64 = self.stages.iter().map(|s| u64::from(s.weight)).sum();
        if total_weight == 0 {
            self.progress = 0;
            return;
        }
        let weighted: u64 = self
            .stages
            .iter()
            .map(|s| u64::from(s.weight) * u64::from(s.progress))
            .sum();
        self.progress = (weighted / total_weight) as u8;
    }
}

/// Errors from cancel requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CancelError {
    /// No session with that id.
    #[error("unknown session: {0}")]
    NotFound(SessionId),
    /// The session already reached a terminal status.
    #[error("session {0} already finished")]
    AlreadyTerminal(SessionId),
}

struct StoreInner {
    sessions: HashMap<SessionId, AnalysisSession>,
    /// Insertion order, oldest first.
    order: Vec<SessionId>,
    tokens: HashMap<SessionId, CancellationToken>,
}

/// Shared in-memory session store.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl SessionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                sessions: HashMap::new(),
                order: Vec::new(),
                tokens: HashMap::new(),
            })),
        }
    }

    /// Create a session for the request with stages from configuration.
    ///
    /// Generated ids are unique, so creation never overwrites.
    pub fn create(&self, request: AnalysisRequest, stage_defs: &[StageDef]) -> AnalysisSession {
        let now = Utc::now();
        let session = AnalysisSession {
            id: SessionId::generate(),
            request,
            status: SessionStatus::Pending,
            stages: stage_defs.iter().map(StageState::from_def).collect(),
            progress: 0,
            report: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write();
        let _ = inner
            .tokens
            .insert(session.id.clone(), CancellationToken::new());
        inner.order.push(session.id.clone());
        let _ = inner.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Fetch one session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<AnalysisSession> {
        self.inner.read().sessions.get(id).cloned()
    }

    /// All sessions, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<AnalysisSession> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect()
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutate a session in place; bumps `updated_at` and recomputes overall
    /// progress. Returns the updated session.
    pub fn update<F>(&self, id: &SessionId, mutate: F) -> Option<AnalysisSession>
    where
        F: FnOnce(&mut AnalysisSession),
    {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(id)?;
        mutate(session);
        session.recompute_progress();
        session.updated_at = Utc::now();
        Some(session.clone())
    }

    /// The cancellation token of a live session.
    #[must_use]
    pub fn token(&self, id: &SessionId) -> Option<CancellationToken> {
        self.inner.read().tokens.get(id).cloned()
    }

    /// Cancel a non-terminal session: flips it to `Cancelled` and fires its
    /// token so the pipeline unwinds.
    pub fn cancel(&self, id: &SessionId) -> Result<AnalysisSession, CancelError> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| CancelError::NotFound(id.clone()))?;
        if session.status.is_terminal() {
            return Err(CancelError::AlreadyTerminal(id.clone()));
        }
        session.status = SessionStatus::Cancelled;
        session.error = Some("cancelled".to_string());
        session.updated_at = Utc::now();
        let snapshot = session.clone();
        if let Some(token) = inner.tokens.get(id) {
            token.cancel();
        }
        Ok(snapshot)
    }

    /// Drop finished sessions older than `max_age`. Returns how many were
    /// removed.
    pub fn purge_finished(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut inner = self.inner.write();
        let stale: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|s| s.status.is_terminal() && s.updated_at < cutoff)
            .map(|s| s.id.clone())
            .collect();
        for id in &stale {
            let _ = inner.sessions.remove(id);
            let _ = inner.tokens.remove(id);
        }
        inner.order.retain(|id| !stale.contains(id));
        stale.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
