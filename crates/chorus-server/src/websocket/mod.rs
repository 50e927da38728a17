//! WebSocket connection management, fan-out, message dispatch, and the
//! per-connection read/write loops.

pub mod broadcast;
pub mod connection;
pub mod gateway;
pub mod handler;
pub mod session;
