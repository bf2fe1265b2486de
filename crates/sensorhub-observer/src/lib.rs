//! HTTP and `WebSocket` surface for SensorHub.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws`) that registers each connection as a
//!   subscriber in the shared [`SubscriberRegistry`] and forwards every
//!   broadcast reading as a JSON text frame
//! - **Dashboard** (`GET /`) served from `index.html` in the configured
//!   static directory, with the rest of that directory under `/static`
//!
//! The server never touches sensors or the store; it only adds and removes
//! registry entries. The aggregation loop does the broadcasting.
//!
//! [`SubscriberRegistry`]: sensorhub_core::SubscriberRegistry

pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{bind, serve, ServerError};
pub use state::AppState;
