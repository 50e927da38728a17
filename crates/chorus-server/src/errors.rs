//! Session error types.

use chorus_core::{ProtocolError, StoreError};
use thiserror::Error;

/// Errors raised while serving one WebSocket session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection was already closed.
    #[error("connection already closed")]
    ConnectionClosed,

    /// A store or identity collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An inbound frame could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An outbound event could not be serialized.
    #[error("failed to serialize outbound event: {0}")]
    Serialize(#[from] serde_json::Error),
}
