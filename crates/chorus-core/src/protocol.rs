//! Wire protocol for listening sessions.
//!
//! Every frame, in both directions, is a JSON object `{"t": <type>, "p":
//! <payload>}`. The payload shape depends on the type, so inbound frames are
//! decoded in two stages: first the envelope, then the payload for the type
//! named by `t`. Outbound frames are produced from [`OutboundEvent`], which
//! serializes to the same envelope via serde's adjacent tagging.

use std::fmt;
use std::sync::Arc;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::ids::TrackId;
use crate::listener::{Listener, Profile};

/// A serialized frame ready to be queued on a connection.
///
/// Shared so one broadcast serializes once and every recipient holds a
/// reference to the same bytes.
pub type Frame = Arc<str>;

/// Every event type string used on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A peer joined the track (out).
    UserJoined,
    /// A peer left the track (out).
    UserLeft,
    /// Start listening to a track (in).
    JoinSession,
    /// Stop listening (in).
    LeaveSession,
    /// Ask for the current listeners (in).
    GetListeners,
    /// Reply to `get_listeners` (out).
    CurrentListeners,
    /// Periodic position report (in/out).
    Progress,
    /// Explicit jump to a position (in/out).
    Seek,
    /// Playback paused (in/out).
    Pause,
    /// Playback resumed (in/out).
    Resume,
    /// Chat line (in/out).
    ChatMessage,
    /// A request could not be completed (out, requester only).
    Error,
}

impl EventType {
    /// All event types in declaration order.
    pub const ALL: [Self; 12] = [
        Self::UserJoined,
        Self::UserLeft,
        Self::JoinSession,
        Self::LeaveSession,
        Self::GetListeners,
        Self::CurrentListeners,
        Self::Progress,
        Self::Seek,
        Self::Pause,
        Self::Resume,
        Self::ChatMessage,
        Self::Error,
    ];

    /// The wire string for this type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserJoined => "user_joined",
            Self::UserLeft => "user_left",
            Self::JoinSession => "join_session",
            Self::LeaveSession => "leave_session",
            Self::GetListeners => "get_listeners",
            Self::CurrentListeners => "current_listeners",
            Self::Progress => "progress",
            Self::Seek => "seek",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::ChatMessage => "chat_message",
            Self::Error => "error",
        }
    }

    /// Look up a type by its wire string.
    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Whether clients may send this type.
    pub const fn is_inbound(self) -> bool {
        matches!(
            self,
            Self::JoinSession
                | Self::LeaveSession
                | Self::GetListeners
                | Self::Progress
                | Self::Seek
                | Self::Pause
                | Self::Resume
                | Self::ChatMessage
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// First decode stage: the type tag and a still-opaque payload.
#[derive(Debug, Deserialize)]
struct Envelope {
    t: String,
    #[serde(default)]
    p: Value,
}

#[derive(Debug, Deserialize)]
struct JoinSessionPayload {
    track_id: TrackId,
    #[serde(default)]
    position: f64,
}

#[derive(Debug, Deserialize)]
struct PositionPayload {
    position: f64,
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    message: String,
}

/// A decoded client event.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// Join `track_id`, starting at `position` seconds.
    JoinSession {
        /// Track to join.
        track_id: TrackId,
        /// Initial playback position.
        position: f64,
    },
    /// Leave the current track.
    LeaveSession,
    /// Request the listener list of the current track.
    GetListeners,
    /// Periodic position report.
    Progress {
        /// Playback position in seconds.
        position: f64,
    },
    /// Jump to a position.
    Seek {
        /// Playback position in seconds.
        position: f64,
    },
    /// Playback paused.
    Pause,
    /// Playback resumed.
    Resume,
    /// Chat line for everyone on the track.
    ChatMessage {
        /// Message text.
        message: String,
    },
}

impl InboundEvent {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(ProtocolError::InvalidEnvelope)?;
        let event_type = EventType::from_wire(&envelope.t)
            .filter(|t| t.is_inbound())
            .ok_or(ProtocolError::UnknownEventType(envelope.t))?;
        Self::from_payload(event_type, envelope.p)
    }

    fn from_payload(event_type: EventType, payload: Value) -> Result<Self, ProtocolError> {
        let event = match event_type {
            EventType::JoinSession => {
                let p: JoinSessionPayload = payload_as(event_type, payload)?;
                Self::JoinSession {
                    track_id: p.track_id,
                    position: checked_position(event_type, p.position)?,
                }
            }
            EventType::LeaveSession => Self::LeaveSession,
            EventType::GetListeners => Self::GetListeners,
            EventType::Progress => {
                let p: PositionPayload = payload_as(event_type, payload)?;
                Self::Progress {
                    position: checked_position(event_type, p.position)?,
                }
            }
            EventType::Seek => {
                let p: PositionPayload = payload_as(event_type, payload)?;
                Self::Seek {
                    position: checked_position(event_type, p.position)?,
                }
            }
            EventType::Pause => Self::Pause,
            EventType::Resume => Self::Resume,
            EventType::ChatMessage => {
                let p: ChatPayload = payload_as(event_type, payload)?;
                Self::ChatMessage { message: p.message }
            }
            other => return Err(ProtocolError::UnknownEventType(other.as_str().to_owned())),
        };
        Ok(event)
    }

    /// The wire type of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::JoinSession { .. } => EventType::JoinSession,
            Self::LeaveSession => EventType::LeaveSession,
            Self::GetListeners => EventType::GetListeners,
            Self::Progress { .. } => EventType::Progress,
            Self::Seek { .. } => EventType::Seek,
            Self::Pause => EventType::Pause,
            Self::Resume => EventType::Resume,
            Self::ChatMessage { .. } => EventType::ChatMessage,
        }
    }
}

fn payload_as<T: DeserializeOwned>(event_type: EventType, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload {
        event: event_type.as_str(),
        source,
    })
}

fn checked_position(event_type: EventType, position: f64) -> Result<f64, ProtocolError> {
    if position.is_finite() && position >= 0.0 {
        Ok(position)
    } else {
        Err(ProtocolError::InvalidPayload {
            event: event_type.as_str(),
            source: serde_json::Error::custom(format!("position must be >= 0, got {position}")),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Payload naming only the acting user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    /// Acting user.
    pub username: String,
}

/// Payload for `user_joined`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserJoinedPayload {
    /// Joining user.
    pub username: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Position the user joined at.
    pub position: f64,
}

/// Payload for outbound `progress` and `seek`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionPayloadOut {
    /// Reporting user.
    pub username: String,
    /// Playback position in seconds.
    pub position: f64,
}

/// Payload for outbound `chat_message`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    /// Author.
    pub username: String,
    /// Author display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Author avatar reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Message text.
    pub message: String,
    /// Server receive time, epoch milliseconds.
    pub timestamp: i64,
}

/// Payload for `current_listeners`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListenersPayload {
    /// Everyone currently on the track, including the requester.
    pub listeners: Vec<Listener>,
}

/// Payload for `error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Type of the event that failed.
    pub event: EventType,
    /// Human-readable reason.
    pub message: String,
}

/// A server-originated event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "p", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A peer joined.
    UserJoined(UserJoinedPayload),
    /// A peer left.
    UserLeft(UserPayload),
    /// Listener snapshot for the requester.
    CurrentListeners(ListenersPayload),
    /// A peer reported its position.
    Progress(PositionPayloadOut),
    /// A peer jumped to a position.
    Seek(PositionPayloadOut),
    /// A peer paused.
    Pause(UserPayload),
    /// A peer resumed.
    Resume(UserPayload),
    /// A peer sent a chat line.
    ChatMessage(ChatMessagePayload),
    /// The requester's last action failed.
    Error(ErrorPayload),
}

impl OutboundEvent {
    /// `user_joined` with optional display information.
    pub fn user_joined(username: &str, profile: Option<&Profile>, position: f64) -> Self {
        let profile = profile.cloned().unwrap_or_default();
        Self::UserJoined(UserJoinedPayload {
            username: username.to_owned(),
            name: profile.name,
            avatar: profile.avatar,
            position,
        })
    }

    /// `user_left`.
    pub fn user_left(username: &str) -> Self {
        Self::UserLeft(UserPayload {
            username: username.to_owned(),
        })
    }

    /// `chat_message` stamped with `timestamp` (epoch ms).
    pub fn chat_message(
        username: &str,
        profile: Option<&Profile>,
        message: String,
        timestamp: i64,
    ) -> Self {
        let profile = profile.cloned().unwrap_or_default();
        Self::ChatMessage(ChatMessagePayload {
            username: username.to_owned(),
            name: profile.name,
            avatar: profile.avatar,
            message,
            timestamp,
        })
    }

    /// `error` reply for a failed request.
    pub fn error(event: EventType, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            event,
            message: message.into(),
        })
    }

    /// The wire type of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::UserJoined(_) => EventType::UserJoined,
            Self::UserLeft(_) => EventType::UserLeft,
            Self::CurrentListeners(_) => EventType::CurrentListeners,
            Self::Progress(_) => EventType::Progress,
            Self::Seek(_) => EventType::Seek,
            Self::Pause(_) => EventType::Pause,
            Self::Resume(_) => EventType::Resume,
            Self::ChatMessage(_) => EventType::ChatMessage,
            Self::Error(_) => EventType::Error,
        }
    }

    /// Serialize into a shareable frame.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_strings_roundtrip() {
        for t in EventType::ALL {
            assert_eq!(EventType::from_wire(t.as_str()), Some(t));
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json, t.as_str());
        }
        assert_eq!(EventType::from_wire("nope"), None);
    }

    #[test]
    fn decode_join_session() {
        let ev = InboundEvent::decode(r#"{"t":"join_session","p":{"track_id":7,"position":12.5}}"#)
            .unwrap();
        assert_eq!(
            ev,
            InboundEvent::JoinSession {
                track_id: TrackId::new(7),
                position: 12.5
            }
        );
    }

    #[test]
    fn join_session_position_defaults_to_zero() {
        let ev = InboundEvent::decode(r#"{"t":"join_session","p":{"track_id":3}}"#).unwrap();
        assert_eq!(
            ev,
            InboundEvent::JoinSession {
                track_id: TrackId::new(3),
                position: 0.0
            }
        );
    }

    #[test]
    fn payloadless_events_accept_missing_null_or_empty_payload() {
        for frame in [
            r#"{"t":"pause"}"#,
            r#"{"t":"pause","p":null}"#,
            r#"{"t":"pause","p":{}}"#,
        ] {
            assert_eq!(InboundEvent::decode(frame).unwrap(), InboundEvent::Pause);
        }
        assert_eq!(
            InboundEvent::decode(r#"{"t":"leave_session"}"#).unwrap(),
            InboundEvent::LeaveSession
        );
        assert_eq!(
            InboundEvent::decode(r#"{"t":"get_listeners","p":{}}"#).unwrap(),
            InboundEvent::GetListeners
        );
    }

    #[test]
    fn progress_and_seek_share_shape_but_stay_distinct() {
        let p = InboundEvent::decode(r#"{"t":"progress","p":{"position":30.0}}"#).unwrap();
        let s = InboundEvent::decode(r#"{"t":"seek","p":{"position":30.0}}"#).unwrap();
        assert_eq!(p, InboundEvent::Progress { position: 30.0 });
        assert_eq!(s, InboundEvent::Seek { position: 30.0 });
        assert_ne!(p.event_type(), s.event_type());
    }

    #[test]
    fn not_json_is_invalid_envelope() {
        let err = InboundEvent::decode("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));
        let err = InboundEvent::decode(r#"{"p":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));
    }

    #[test]
    fn unknown_type_rejected() {
        let err = InboundEvent::decode(r#"{"t":"dance","p":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEventType(ref t) if t == "dance"));
    }

    #[test]
    fn outbound_only_types_rejected_inbound() {
        let err = InboundEvent::decode(r#"{"t":"user_joined","p":{"username":"x","position":1}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEventType(_)));
    }

    #[test]
    fn wrong_payload_shape_rejected() {
        let err = InboundEvent::decode(r#"{"t":"join_session","p":{"track_id":"seven"}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidPayload {
                event: "join_session",
                ..
            }
        ));
        let err = InboundEvent::decode(r#"{"t":"chat_message","p":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { event: "chat_message", .. }));
    }

    #[test]
    fn negative_position_rejected() {
        let err = InboundEvent::decode(r#"{"t":"seek","p":{"position":-4}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { event: "seek", .. }));
    }

    #[test]
    fn user_joined_frame_shape() {
        let profile = Profile {
            name: Some("Alice".into()),
            avatar: None,
        };
        let frame = OutboundEvent::user_joined("alice", Some(&profile), 12.5)
            .to_frame()
            .unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            v,
            json!({"t": "user_joined", "p": {"username": "alice", "name": "Alice", "position": 12.5}})
        );
    }

    #[test]
    fn user_left_and_pause_frame_shape() {
        let v = serde_json::to_value(OutboundEvent::user_left("bob")).unwrap();
        assert_eq!(v, json!({"t": "user_left", "p": {"username": "bob"}}));
        let v = serde_json::to_value(OutboundEvent::Pause(UserPayload {
            username: "bob".into(),
        }))
        .unwrap();
        assert_eq!(v, json!({"t": "pause", "p": {"username": "bob"}}));
    }

    #[test]
    fn chat_frame_shape() {
        let v = serde_json::to_value(OutboundEvent::chat_message(
            "carol",
            None,
            "hi".into(),
            1_700_000_000_000,
        ))
        .unwrap();
        assert_eq!(
            v,
            json!({"t": "chat_message", "p": {"username": "carol", "message": "hi", "timestamp": 1_700_000_000_000_i64}})
        );
    }

    #[test]
    fn current_listeners_frame_shape() {
        let ev = OutboundEvent::CurrentListeners(ListenersPayload {
            listeners: vec![Listener::new("dave", TrackId::new(2), 3.0)],
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            v,
            json!({"t": "current_listeners", "p": {"listeners": [{"username": "dave", "track_id": 2, "position": 3.0}]}})
        );
    }

    #[test]
    fn error_frame_shape() {
        let v = serde_json::to_value(OutboundEvent::error(EventType::Progress, "store down")).unwrap();
        assert_eq!(
            v,
            json!({"t": "error", "p": {"event": "progress", "message": "store down"}})
        );
    }

    #[test]
    fn outbound_frames_parse_back() {
        let ev = OutboundEvent::Seek(PositionPayloadOut {
            username: "erin".into(),
            position: 99.0,
        });
        let frame = ev.to_frame().unwrap();
        let back: OutboundEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(back, ev);
        assert_eq!(back.event_type(), EventType::Seek);
    }
}
