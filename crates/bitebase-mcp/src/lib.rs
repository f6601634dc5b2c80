//! # bitebase-mcp
//!
//! MCP (Model Context Protocol) connection manager for the BiteBase backend.
//!
//! The backend is an MCP *client*: every analysis stage is served by an
//! external tool server (web scraping, data analysis, financial datasets,
//! chart generation) reached over one of two transports. This crate owns the
//! full lifecycle:
//!
//! - **[`transport`]**: [`transport::StdioTransport`] (child process,
//!   newline-delimited JSON-RPC) and [`transport::HttpTransport`]
//!   (streamable HTTP with SSE responses)
//! - **[`client`]**: initialize handshake, `tools/list`, `tools/call`,
//!   `ping`, request/response correlation, per-call timeout
//! - **[`manager`]**: server registry, concurrent connect fan-out, periodic
//!   health checks, reconnect with bounded exponential backoff, and
//!   capability-based fallback routing
//!
//! ## Crate Position
//!
//! Depends on `bitebase-core` (retry policy, ids) and `bitebase-settings`
//! (server definitions). Consumed by `bitebase-runtime` (pipeline dispatch)
//! and `bitebase-server` (status API).

#![deny(unsafe_code)]

pub mod client;
pub mod manager;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use manager::{Connector, DefaultConnector, McpManager};
pub use types::{JsonRpcMessage, McpError, ServerHealth, ServerStatus, ToolDescriptor};
