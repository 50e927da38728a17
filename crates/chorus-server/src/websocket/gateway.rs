//! Session gateway: the state-mutation and fan-out contract the message
//! handler drives.

use std::sync::Arc;

use async_trait::async_trait;
use chorus_core::{Frame, Listener, StoreError, TrackId};
use chorus_store::ListenerStore;
use metrics::counter;
use tracing::{debug, info, warn};

use super::broadcast::ConnectionRegistry;
use crate::metrics::{GATEWAY_ERRORS_TOTAL, SESSION_JOINS_TOTAL, SESSION_LEAVES_TOTAL};

/// Operations the message handler performs on shared session state.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Record that `username` joined `track_id` at `position`.
    async fn join_session(
        &self,
        username: &str,
        track_id: TrackId,
        position: f64,
    ) -> Result<(), StoreError>;

    /// Record that `username` left `track_id`.
    ///
    /// Leaving a session the store no longer knows about succeeds.
    async fn leave_session(&self, username: &str, track_id: TrackId) -> Result<(), StoreError>;

    /// Snapshot of everyone listening to `track_id`.
    async fn current_listeners(&self, track_id: TrackId) -> Result<Vec<Listener>, StoreError>;

    /// Record a new playback position.
    async fn update_position(
        &self,
        username: &str,
        track_id: TrackId,
        position: f64,
    ) -> Result<(), StoreError>;

    /// Fan `frame` out to `track_id`, skipping `sender`.
    async fn broadcast_to_track(&self, track_id: TrackId, frame: &Frame, sender: &str) -> usize;
}

/// [`SessionGateway`] backed by a [`ListenerStore`] and the connection
/// registry.
pub struct ListenerGateway {
    store: Arc<dyn ListenerStore>,
    registry: Arc<ConnectionRegistry>,
}

impl ListenerGateway {
    /// Create a gateway over `store` that broadcasts through `registry`.
    pub fn new(store: Arc<dyn ListenerStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }
}

fn record_failure(operation: &'static str, err: &StoreError) {
    counter!(GATEWAY_ERRORS_TOTAL, "operation" => operation).increment(1);
    warn!(operation, error = %err, "session store operation failed");
}

#[async_trait]
impl SessionGateway for ListenerGateway {
    async fn join_session(
        &self,
        username: &str,
        track_id: TrackId,
        position: f64,
    ) -> Result<(), StoreError> {
        self.store
            .start_listening(username, track_id, position)
            .await
            .inspect_err(|e| record_failure("join_session", e))?;
        counter!(SESSION_JOINS_TOTAL).increment(1);
        info!(username, track_id = %track_id, position, "joined session");
        Ok(())
    }

    async fn leave_session(&self, username: &str, track_id: TrackId) -> Result<(), StoreError> {
        match self.store.stop_listening(username, track_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_listening() => {
                debug!(username, track_id = %track_id, "leave for user with no listening record");
            }
            Err(e) => {
                record_failure("leave_session", &e);
                return Err(e);
            }
        }
        counter!(SESSION_LEAVES_TOTAL).increment(1);
        info!(username, track_id = %track_id, "left session");
        Ok(())
    }

    async fn current_listeners(&self, track_id: TrackId) -> Result<Vec<Listener>, StoreError> {
        self.store
            .current_listeners(track_id)
            .await
            .inspect_err(|e| record_failure("current_listeners", e))
    }

    async fn update_position(
        &self,
        username: &str,
        track_id: TrackId,
        position: f64,
    ) -> Result<(), StoreError> {
        self.store
            .update_position(username, track_id, position)
            .await
            .inspect_err(|e| record_failure("update_position", e))
    }

    async fn broadcast_to_track(&self, track_id: TrackId, frame: &Frame, sender: &str) -> usize {
        self.registry.broadcast_to_track(track_id, frame, sender).await
    }
}

#[cfg(test)]
mod tests {
    use chorus_store::MemoryListenerStore;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::websocket::connection::ClientConnection;

    const T7: TrackId = TrackId::new(7);

    fn make_gateway() -> (ListenerGateway, Arc<MemoryListenerStore>, Arc<ConnectionRegistry>) {
        let store = Arc::new(MemoryListenerStore::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = ListenerGateway::new(store.clone(), registry.clone());
        (gateway, store, registry)
    }

    #[tokio::test]
    async fn join_and_list() {
        let (gw, _store, _reg) = make_gateway();
        gw.join_session("alice", T7, 12.5).await.unwrap();
        let listeners = gw.current_listeners(T7).await.unwrap();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].username, "alice");
    }

    #[tokio::test]
    async fn leave_without_record_succeeds() {
        let (gw, _store, _reg) = make_gateway();
        gw.leave_session("alice", T7).await.unwrap();
    }

    #[tokio::test]
    async fn leave_removes_record() {
        let (gw, store, _reg) = make_gateway();
        gw.join_session("alice", T7, 0.0).await.unwrap();
        gw.leave_session("alice", T7).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn update_position_propagates_not_listening() {
        let (gw, _store, _reg) = make_gateway();
        let err = gw.update_position("alice", T7, 3.0).await.unwrap_err();
        assert!(err.is_not_listening());
    }

    #[tokio::test]
    async fn broadcast_passes_through_registry() {
        let (gw, _store, reg) = make_gateway();
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Arc::new(ClientConnection::new("bob".into(), tx, &CancellationToken::new()));
        conn.set_track(T7);
        let _ = reg.register(conn).await;

        assert_eq!(gw.broadcast_to_track(T7, &Frame::from("hi"), "alice").await, 1);
        assert_eq!(&*rx.recv().await.unwrap(), "hi");
    }
}
