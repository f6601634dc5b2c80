//! # bitebase-runtime
//!
//! Analysis sessions and the staged pipeline.
//!
//! - **[`session`]**: in-memory [`session::SessionStore`] keyed by generated
//!   session id. Nothing survives a restart, by design.
//! - **[`pipeline`]**: [`pipeline::AnalysisPipeline`] runs the configured
//!   stages for one session, dispatching each stage to an MCP server by
//!   capability and emitting progress events.
//! - **[`hub`]**: [`hub::EventHub`] broadcast channel bridging the pipeline
//!   to WebSocket/SSE subscribers.
//!
//! ## Crate Position
//!
//! Sits between `bitebase-mcp` (tool dispatch) and `bitebase-server`
//! (API surface).

#![deny(unsafe_code)]

pub mod hub;
pub mod pipeline;
pub mod session;

pub use hub::EventHub;
pub use pipeline::AnalysisPipeline;
pub use session::{AnalysisRequest, AnalysisSession, SessionStatus, SessionStore, StageState};
