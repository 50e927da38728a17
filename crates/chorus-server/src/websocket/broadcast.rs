//! Connection registry and per-track fan-out.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chorus_core::{Frame, OutboundEvent, Profile, TrackId};
use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::connection::ClientConnection;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Active connections indexed by username.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection under its username.
    ///
    /// A connection already registered for the same user is replaced, closed
    /// and returned.
    pub async fn register(&self, connection: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        let prev = {
            let mut conns = self.connections.write().await;
            conns.insert(connection.username.clone(), connection.clone())
        };
        if let Some(ref old) = prev {
            info!(
                username = %connection.username,
                old_conn = %old.id,
                new_conn = %connection.id,
                "replacing existing connection"
            );
            old.close();
        }
        prev
    }

    /// Remove `connection` if it is still the registered one for its user.
    ///
    /// Returns whether an entry was removed.
    pub async fn unregister(&self, connection: &ClientConnection) -> bool {
        let mut conns = self.connections.write().await;
        if conns
            .get(&connection.username)
            .is_some_and(|c| c.id == connection.id)
        {
            let _ = conns.remove(&connection.username);
            true
        } else {
            debug!(
                username = %connection.username,
                conn_id = %connection.id,
                "connection already replaced, leaving registry entry"
            );
            false
        }
    }

    /// Queue `frame` for every connection in session on `track_id` except
    /// the one belonging to `sender`.
    ///
    /// Returns the number of connections the frame was queued for.
    pub async fn broadcast_to_track(&self, track_id: TrackId, frame: &Frame, sender: &str) -> usize {
        let conns = self.connections.read().await;
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.username == sender || conn.track_id() != Some(track_id) {
                continue;
            }
            if conn.send(frame.clone()) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(username = %conn.username, track_id = %track_id, "failed to send frame to listener");
            }
        }
        debug!(track_id = %track_id, sender, recipients = delivered, "broadcast to track");
        delivered
    }

    /// Tell the other listeners of `track_id` that `username` joined.
    pub async fn broadcast_user_joined(
        &self,
        track_id: TrackId,
        username: &str,
        profile: Option<&Profile>,
        position: f64,
    ) -> usize {
        self.broadcast_event(track_id, &OutboundEvent::user_joined(username, profile, position), username)
            .await
    }

    /// Tell the other listeners of `track_id` that `username` left.
    pub async fn broadcast_user_left(&self, track_id: TrackId, username: &str) -> usize {
        self.broadcast_event(track_id, &OutboundEvent::user_left(username), username)
            .await
    }

    /// Serialize `event` and broadcast it to `track_id`.
    pub async fn broadcast_event(&self, track_id: TrackId, event: &OutboundEvent, sender: &str) -> usize {
        match event.to_frame() {
            Ok(frame) => self.broadcast_to_track(track_id, &frame, sender).await,
            Err(e) => {
                warn!(event_type = %event.event_type(), error = %e, "failed to serialize event");
                0
            }
        }
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Connection registered for `username`.
    pub async fn get(&self, username: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(username).cloned()
    }

    /// Distinct tracks with at least one connection in session.
    pub async fn active_tracks(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter_map(|c| c.track_id())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
