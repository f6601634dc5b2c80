//! Staged analysis execution.
//!
//! One run walks the configured stages in order. Each stage is dispatched to
//! an MCP server by capability (with fallback handled by the manager), its
//! result folds into the final report, and every transition is published on
//! the [`EventHub`]. A stage failure or a cancellation stops the run; the
//! stages are sequential because later agents consume earlier results.

use std::time::Instant;

use metrics::counter;
use serde_json::{Value, json};
use tracing::{info, warn};

use bitebase_core::events::{AnalysisEvent, wire_timestamp};
use bitebase_core::ids::SessionId;
use bitebase_mcp::McpManager;
use bitebase_settings::{PipelineSettings, StageDef};

use crate::hub::EventHub;
use crate::session::{
    AnalysisRequest, AnalysisSession, SessionStatus, SessionStore, StageStatus,
};

/// Runs analyses against the MCP fleet.
#[derive(Clone)]
pub struct AnalysisPipeline {
    manager: McpManager,
    store: SessionStore,
    hub: EventHub,
    stages: Vec<StageDef>,
}

impl AnalysisPipeline {
    /// Build a pipeline over the shared manager, store, and hub.
    #[must_use]
    pub fn new(
        manager: McpManager,
        store: SessionStore,
        hub: EventHub,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            manager,
            store,
            hub,
            stages: settings.stages,
        }
    }

    /// The session store this pipeline writes to.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Create a session without starting it.
    ///
    /// Lets callers subscribe to the session's events before the first one
    /// is published; follow up with [`AnalysisPipeline::spawn_run`].
    pub fn create(&self, request: AnalysisRequest) -> AnalysisSession {
        self.store.create(request, &self.stages)
    }

    /// Run an existing session in the background.
    pub fn spawn_run(&self, id: SessionId) {
        let pipeline = self.clone();
        drop(tokio::spawn(async move {
            pipeline.run(id).await;
        }));
    }

    /// Create a session and spawn its run in the background.
    pub fn start(&self, request: AnalysisRequest) -> AnalysisSession {
        let session = self.create(request);
        self.spawn_run(session.id.clone());
        session
    }

    /// Execute the pipeline for an existing session.
    pub async fn run(&self, id: SessionId) {
        let Some(session) = self.store.get(&id) else {
            warn!(session = %id, "run requested for unknown session");
            return;
        };
        let Some(token) = self.store.token(&id) else {
            warn!(session = %id, "session has no cancellation token");
            return;
        };

        counter!("analysis_runs_total").increment(1);
        let started = Instant::now();
        let request = session.request.clone();

        let _ = self.store.update(&id, |s| s.status = SessionStatus::Running);
        self.hub.publish(AnalysisEvent::AnalysisStarted {
            session_id: id.clone(),
            timestamp: wire_timestamp(),
            agents: self.stages.iter().map(|s| s.agent.clone()).collect(),
        });
        info!(session = %id, location = %request.location, "analysis started");

        let mut stage_results = serde_json::Map::new();

        for (index, stage) in self.stages.iter().enumerate() {
            if token.is_cancelled() {
                self.finish_cancelled(&id);
                return;
            }

            let stage_started = Instant::now();
            let _ = self.store.update(&id, |s| {
                if let Some(state) = s.stages.get_mut(index) {
                    state.status = StageStatus::Running;
                    state.started_at = Some(chrono::Utc::now());
                }
            });
            self.hub.publish(AnalysisEvent::AgentProgress {
                session_id: id.clone(),
                timestamp: wire_timestamp(),
                agent: stage.agent.clone(),
                progress: 0,
                message: Some(format!("dispatching to capability {:?}", stage.capability)),
            });

            let arguments = json!({
                "location": request.location,
                "cuisine": request.cuisine,
                "query": request.query,
                "stage": stage.agent,
                "context": Value::Object(stage_results.clone()),
            });

            let outcome = tokio::select! {
                () = token.cancelled() => {
                    self.finish_cancelled(&id);
                    return;
                }
                result = self.manager.call_with_capability(
                    &stage.capability,
                    &stage.tool,
                    arguments,
                ) => result,
            };

            match outcome {
                Ok((served_by, result)) => {
                    let duration_ms = stage_started.elapsed().as_millis() as u64;
                    let _ = self.store.update(&id, |s| {
                        if let Some(state) = s.stages.get_mut(index) {
                            state.status = StageStatus::Completed;
                            state.progress = 100;
                            state.served_by = Some(served_by.to_string());
                            state.completed_at = Some(chrono::Utc::now());
                        }
                    });
                    self.hub.publish(AnalysisEvent::AgentProgress {
                        session_id: id.clone(),
                        timestamp: wire_timestamp(),
                        agent: stage.agent.clone(),
                        progress: 100,
                        message: None,
                    });
                    self.hub.publish(AnalysisEvent::AgentCompleted {
                        session_id: id.clone(),
                        timestamp: wire_timestamp(),
                        agent: stage.agent.clone(),
                        result: result.clone(),
                        duration_ms,
                    });
                    let _ = stage_results.insert(stage.agent.clone(), result);
                }
                Err(e) => {
                    counter!("analysis_failures_total").increment(1);
                    warn!(session = %id, agent = %stage.agent, error = %e, "stage failed");
                    let message = e.to_string();
                    let _ = self.store.update(&id, |s| {
                        s.status = SessionStatus::Failed;
                        s.error = Some(message.clone());
                        if let Some(state) = s.stages.get_mut(index) {
                            state.status = StageStatus::Failed;
                            state.error = Some(message.clone());
                            state.completed_at = Some(chrono::Utc::now());
                        }
                    });
                    self.hub.publish(AnalysisEvent::AnalysisError {
                        session_id: id.clone(),
                        timestamp: wire_timestamp(),
                        agent: Some(stage.agent.clone()),
                        error: message,
                    });
                    return;
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let report = json!({
            "request": request,
            "stages": Value::Object(stage_results),
            "generatedAt": wire_timestamp(),
            "durationMs": duration_ms,
        });

        let _ = self.store.update(&id, |s| {
            // A cancel that landed after the last stage must win.
            if s.status == SessionStatus::Running {
                s.status = SessionStatus::Completed;
                s.report = Some(report.clone());
            }
        });
        if self.store.get(&id).map(|s| s.status) == Some(SessionStatus::Completed) {
            info!(session = %id, duration_ms, "analysis completed");
            self.hub.publish(AnalysisEvent::AnalysisCompleted {
                session_id: id.clone(),
                timestamp: wire_timestamp(),
                report,
                duration_ms,
            });
        }
    }

    fn finish_cancelled(&self, id: &SessionId) {
        info!(session = %id, "analysis cancelled");
        let _ = self.store.update(id, |s| {
            if s.status != SessionStatus::Cancelled {
                s.status = SessionStatus::Cancelled;
                s.error = Some("cancelled".to_string());
            }
        });
        self.hub.publish(AnalysisEvent::AnalysisError {
            session_id: id.clone(),
            timestamp: wire_timestamp(),
            agent: None,
            error: "cancelled".to_string(),
        });
    }
}
