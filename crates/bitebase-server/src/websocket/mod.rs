//! WebSocket connection management, message dispatch, and broadcasting.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | WebSocket upgrade, per-connection read/write loops, client message dispatch |
//! | `broadcast` | Fan-out manager: per-session subscriptions, slow-client eviction |
//!
//! ## Data Flow
//!
//! Client frames (`start-analysis`, `subscribe`) are handled in
//! `connection`; analysis events flow hub → event bridge → `broadcast` →
//! subscribed clients.

pub mod broadcast;
pub mod connection;

pub use broadcast::BroadcastManager;
pub use connection::{ClientConnection, ws_handler};
