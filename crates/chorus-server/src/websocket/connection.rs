//! WebSocket client connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chorus_core::{ConnectionId, Frame, TrackId};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::SessionError;
use crate::metrics::WS_FRAMES_DROPPED_TOTAL;

/// One physical link to one authenticated user.
///
/// Outbound frames go through a bounded queue drained by the connection's
/// write loop. A frame that does not fit closes the connection.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Authenticated username.
    pub username: String,
    /// Track the user is in session with, if any.
    track: Mutex<Option<TrackId>>,
    /// Send side of the outbound queue.
    tx: mpsc::Sender<Frame>,
    /// Cancelled on close; watched by both loops.
    cancel: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Count of frames dropped because the queue was full or closed.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection whose lifetime is bounded by `parent`.
    pub fn new(username: String, tx: mpsc::Sender<Frame>, parent: &CancellationToken) -> Self {
        Self {
            id: ConnectionId::new(),
            username,
            track: Mutex::new(None),
            tx,
            cancel: parent.child_token(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a frame for the write loop without waiting.
    ///
    /// Returns `false` if the frame was not queued. A full queue closes the
    /// connection.
    pub fn send(&self, frame: Frame) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                counter!(WS_FRAMES_DROPPED_TOTAL, "reason" => "overflow").increment(1);
                warn!(
                    username = %self.username,
                    conn_id = %self.id,
                    "outbound queue full, closing slow connection"
                );
                self.close();
                false
            }
            Err(TrySendError::Closed(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Close the connection. Later calls do nothing.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the connection is still open.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Fail with [`SessionError::ConnectionClosed`] once closed.
    pub fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SessionError::ConnectionClosed)
        }
    }

    /// Token cancelled when this connection closes.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Current track, if in session.
    pub fn track_id(&self) -> Option<TrackId> {
        *self.track.lock()
    }

    /// Enter a session on `track_id`.
    pub fn set_track(&self, track_id: TrackId) {
        *self.track.lock() = Some(track_id);
    }

    /// Leave the current session. Returns the track that was cleared.
    pub fn clear_track(&self) -> Option<TrackId> {
        self.track.lock().take()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("track", &self.track_id())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
