//! # bitebase-core
//!
//! Foundation types for the BiteBase market-research backend.
//!
//! This crate provides the shared vocabulary that all other BiteBase crates
//! depend on:
//!
//! - **Branded IDs**: [`ids::SessionId`], [`ids::ServerId`] as newtypes
//! - **Events**: [`events::AnalysisEvent`] broadcast over WebSocket and SSE
//! - **Errors**: [`errors::CoreError`] via `thiserror`
//! - **Retry**: [`retry::RetryConfig`] and backoff calculation
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other bitebase crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod retry;
