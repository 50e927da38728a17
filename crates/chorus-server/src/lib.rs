//! # chorus-server
//!
//! Axum HTTP + `WebSocket` server for synchronized listening sessions.
//!
//! - HTTP endpoints: health check, Prometheus metrics, authenticated upgrade
//! - `WebSocket` core: connection state, registry and per-track fan-out,
//!   session gateway, inbound message state machine, read/write loops
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AuthError, Authenticator, JwtAuthenticator};
pub use config::ServerConfig;
pub use errors::SessionError;
pub use server::ChorusServer;
