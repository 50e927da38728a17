//! Inbound message dispatch: decodes `{t, p}` frames, enforces session
//! membership and drives the session gateway.
//!
//! Per connection the handler moves between two states:
//!
//! - **Connected**: no track. Only `join_session` is accepted.
//! - **In session** on a track: every inbound event is accepted.
//!
//! Collaborator failures abandon the action and send an `error` frame back
//! to the requester. Undecodable frames and out-of-session events are dropped
//! without a reply.
//!
//! Events and disconnect cleanup for one username run one at a time, so a
//! replaced connection's cleanup never interleaves with its replacement's
//! join.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chorus_core::protocol::{ListenersPayload, PositionPayloadOut, UserPayload};
use chorus_core::{EventType, InboundEvent, Listener, OutboundEvent, Profile, TrackId};
use chorus_store::IdentityLookup;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, instrument, warn};

use super::broadcast::ConnectionRegistry;
use super::connection::ClientConnection;
use super::gateway::SessionGateway;
use crate::errors::SessionError;
use crate::metrics::WS_FRAMES_DROPPED_TOTAL;

/// Why a frame was discarded without any effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The frame was not a valid inbound event.
    Decode,
    /// The event requires a session and the connection has none.
    NotInSession,
}

impl DropReason {
    /// Label used for metrics and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::NotInSession => "not_in_session",
        }
    }
}

/// What happened to one inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event was carried out.
    Applied(EventType),
    /// The frame was discarded.
    Dropped(DropReason),
    /// The event was valid but could not be completed.
    Failed(EventType),
}

/// Per-username transition locks. Entries are weak and pruned as the map
/// grows.
#[derive(Default)]
struct UserLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl UserLocks {
    fn get(&self, username: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        if locks.len() > 128 {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }
        if let Some(existing) = locks.get(username).and_then(Weak::upgrade) {
            return existing;
        }
        let lock = Arc::new(AsyncMutex::new(()));
        let _ = locks.insert(username.to_owned(), Arc::downgrade(&lock));
        lock
    }
}

/// Per-server message state machine shared by every connection.
pub struct MessageHandler {
    gateway: Arc<dyn SessionGateway>,
    identity: Arc<dyn IdentityLookup>,
    registry: Arc<ConnectionRegistry>,
    user_locks: UserLocks,
}

impl MessageHandler {
    /// Create a handler.
    pub fn new(
        gateway: Arc<dyn SessionGateway>,
        identity: Arc<dyn IdentityLookup>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            gateway,
            identity,
            registry,
            user_locks: UserLocks::default(),
        }
    }

    /// Handle one inbound text frame from `conn`.
    #[instrument(skip_all, fields(username = %conn.username, event))]
    pub async fn handle_message(&self, conn: &ClientConnection, text: &str) -> HandleOutcome {
        let event = match InboundEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, len = text.len(), "dropping undecodable frame");
                return dropped(DropReason::Decode);
            }
        };
        let event_type = event.event_type();
        let _ = tracing::Span::current().record("event", event_type.as_str());

        let lock = self.user_locks.get(&conn.username);
        let _guard = lock.lock().await;
        let result = match (event, conn.track_id()) {
            (InboundEvent::JoinSession { track_id, position }, _) => {
                self.join(conn, track_id, position).await
            }
            (_, None) => {
                debug!("dropping event outside a session");
                return dropped(DropReason::NotInSession);
            }
            (InboundEvent::LeaveSession, Some(track)) => self.leave_track(conn, track).await,
            (InboundEvent::GetListeners, Some(track)) => self.listeners(conn, track).await,
            (InboundEvent::Progress { position }, Some(track)) => {
                self.position(conn, track, position, EventType::Progress).await
            }
            (InboundEvent::Seek { position }, Some(track)) => {
                self.position(conn, track, position, EventType::Seek).await
            }
            (InboundEvent::Pause, Some(track)) => {
                let event = OutboundEvent::Pause(user_payload(conn));
                self.broadcast(track, &event, &conn.username).await
            }
            (InboundEvent::Resume, Some(track)) => {
                let event = OutboundEvent::Resume(user_payload(conn));
                self.broadcast(track, &event, &conn.username).await
            }
            (InboundEvent::ChatMessage { message }, Some(track)) => {
                self.chat(conn, track, message).await
            }
        };

        match result {
            Ok(()) => HandleOutcome::Applied(event_type),
            Err(e) => {
                report_failure(conn, event_type, &e);
                HandleOutcome::Failed(event_type)
            }
        }
    }

    /// Cleanup after the connection's loops have ended.
    ///
    /// Unregisters the connection and leaves its session, unless a newer
    /// connection of the same user has already taken over that track.
    #[instrument(skip_all, fields(username = %conn.username, conn_id = %conn.id))]
    pub async fn handle_disconnect(&self, conn: &ClientConnection) {
        let lock = self.user_locks.get(&conn.username);
        let _guard = lock.lock().await;

        let was_registered = self.registry.unregister(conn).await;
        let Some(track) = conn.track_id() else {
            return;
        };

        if !was_registered {
            if let Some(current) = self.registry.get(&conn.username).await {
                if current.track_id() == Some(track) {
                    debug!(track_id = %track, "session taken over by newer connection");
                    let _ = conn.clear_track();
                    return;
                }
            }
        }

        if let Err(e) = self.leave_track(conn, track).await {
            warn!(track_id = %track, error = %e, "leave cleanup on disconnect failed");
            let _ = conn.clear_track();
        }
    }

    async fn join(
        &self,
        conn: &ClientConnection,
        track: TrackId,
        position: f64,
    ) -> Result<(), SessionError> {
        if let Some(prev) = conn.track_id() {
            self.leave_track(conn, prev).await?;
        }
        self.gateway
            .join_session(&conn.username, track, position)
            .await?;
        conn.set_track(track);

        let profile = self.lookup_profile(&conn.username).await;
        let event = OutboundEvent::user_joined(&conn.username, profile.as_ref(), position);
        self.broadcast(track, &event, &conn.username).await
    }

    async fn leave_track(&self, conn: &ClientConnection, track: TrackId) -> Result<(), SessionError> {
        self.gateway.leave_session(&conn.username, track).await?;
        let _ = conn.clear_track();
        let event = OutboundEvent::user_left(&conn.username);
        self.broadcast(track, &event, &conn.username).await
    }

    async fn listeners(&self, conn: &ClientConnection, track: TrackId) -> Result<(), SessionError> {
        let mut listeners = self.gateway.current_listeners(track).await?;
        for listener in &mut listeners {
            self.enrich(listener).await;
        }
        let reply = OutboundEvent::CurrentListeners(ListenersPayload { listeners });
        reply_to(conn, &reply)
    }

    async fn position(
        &self,
        conn: &ClientConnection,
        track: TrackId,
        position: f64,
        event_type: EventType,
    ) -> Result<(), SessionError> {
        self.gateway
            .update_position(&conn.username, track, position)
            .await?;
        let payload = PositionPayloadOut {
            username: conn.username.clone(),
            position,
        };
        let event = if event_type == EventType::Seek {
            OutboundEvent::Seek(payload)
        } else {
            OutboundEvent::Progress(payload)
        };
        self.broadcast(track, &event, &conn.username).await
    }

    async fn chat(
        &self,
        conn: &ClientConnection,
        track: TrackId,
        message: String,
    ) -> Result<(), SessionError> {
        let profile = self.lookup_profile(&conn.username).await;
        let timestamp = chrono::Utc::now().timestamp_millis();
        let event = OutboundEvent::chat_message(&conn.username, profile.as_ref(), message, timestamp);
        self.broadcast(track, &event, &conn.username).await
    }

    async fn broadcast(
        &self,
        track: TrackId,
        event: &OutboundEvent,
        sender: &str,
    ) -> Result<(), SessionError> {
        let frame = event.to_frame()?;
        let recipients = self.gateway.broadcast_to_track(track, &frame, sender).await;
        debug!(event_type = %event.event_type(), track_id = %track, recipients, "event broadcast");
        Ok(())
    }

    /// Profile for `username`; lookup failures degrade to no display info.
    async fn lookup_profile(&self, username: &str) -> Option<Profile> {
        match self.identity.profile(username).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(username, error = %e, "identity lookup failed");
                None
            }
        }
    }

    async fn enrich(&self, listener: &mut Listener) {
        if listener.name.is_some() && listener.avatar.is_some() {
            return;
        }
        if let Some(profile) = self.lookup_profile(&listener.username).await {
            listener.enrich(&profile);
        }
    }
}

fn report_failure(conn: &ClientConnection, event_type: EventType, err: &SessionError) {
    match err {
        SessionError::ConnectionClosed => {
            debug!(event_type = %event_type, "connection closed while handling event");
        }
        SessionError::Serialize(e) => {
            error!(event_type = %event_type, error = %e, "failed to serialize outbound event");
        }
        SessionError::Store(_) | SessionError::Protocol(_) => {
            warn!(event_type = %event_type, error = %err, "event failed");
            if let Err(e) = reply_to(conn, &OutboundEvent::error(event_type, err.to_string())) {
                debug!(error = %e, "could not deliver error reply");
            }
        }
    }
}

fn dropped(reason: DropReason) -> HandleOutcome {
    counter!(WS_FRAMES_DROPPED_TOTAL, "reason" => reason.as_str()).increment(1);
    HandleOutcome::Dropped(reason)
}

fn user_payload(conn: &ClientConnection) -> UserPayload {
    UserPayload {
        username: conn.username.clone(),
    }
}

/// Queue `event` for the requester only.
fn reply_to(conn: &ClientConnection, event: &OutboundEvent) -> Result<(), SessionError> {
    conn.ensure_open()?;
    let frame = event.to_frame()?;
    if !conn.send(frame) {
        return Err(SessionError::ConnectionClosed);
    }
    Ok(())
}
