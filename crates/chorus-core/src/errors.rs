//! Error types shared across the workspace.
//!
//! - [`StoreError`]: failures reported by the listener store or identity
//!   directory collaborators
//! - [`ProtocolError`]: inbound frames that cannot be decoded

use thiserror::Error;

use crate::ids::TrackId;

/// Errors from the session store and identity lookup collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The user has no active listening record for the track.
    #[error("{username} is not listening to track {track_id}")]
    NotListening {
        /// User that was expected to be listening.
        username: String,
        /// Track the operation targeted.
        track_id: TrackId,
    },

    /// The backing store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Reading a directory file failed.
    #[error("failed to read directory file: {0}")]
    Io(#[from] std::io::Error),

    /// A directory file contained invalid JSON.
    #[error("failed to parse directory JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this error only reports that nothing was listening.
    pub fn is_not_listening(&self) -> bool {
        matches!(self, Self::NotListening { .. })
    }
}

/// Errors raised while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a `{"t": .., "p": ..}` object.
    #[error("invalid frame envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// The `t` field names no inbound event.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The payload does not match the shape required by its event type.
    #[error("invalid {event} payload: {source}")]
    InvalidPayload {
        /// Event type whose payload failed to decode.
        event: &'static str,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_listening_display() {
        let err = StoreError::NotListening {
            username: "alice".into(),
            track_id: TrackId::new(9),
        };
        assert_eq!(err.to_string(), "alice is not listening to track 9");
        assert!(err.is_not_listening());
    }

    #[test]
    fn unavailable_is_not_not_listening() {
        let err = StoreError::Unavailable("timeout".into());
        assert!(!err.is_not_listening());
        assert_eq!(err.to_string(), "store unavailable: timeout");
    }

    #[test]
    fn json_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Json(_)));
    }

    #[test]
    fn unknown_event_display() {
        let err = ProtocolError::UnknownEventType("dance".into());
        assert_eq!(err.to_string(), "unknown event type: dance");
    }
}
