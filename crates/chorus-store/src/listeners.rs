//! In-memory [`ListenerStore`] with per-record expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chorus_core::{Listener, StoreError, TrackId};
use parking_lot::RwLock;
use tracing::debug;

use crate::traits::ListenerStore;

/// Default record time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct Record {
    listener: Listener,
    expires_at: Instant,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Listener records keyed by username.
///
/// Expired records are invisible to reads and are removed lazily on the next
/// write for that user, or in bulk by [`purge_expired`](Self::purge_expired).
pub struct MemoryListenerStore {
    records: RwLock<HashMap<String, Record>>,
    ttl: Duration,
}

impl MemoryListenerStore {
    /// Create an empty store whose records live for `ttl` after each write.
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| record.is_live(now));
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, "purged expired listener records");
        }
        removed
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records.read().values().filter(|r| r.is_live(now)).count()
    }

    /// Whether no live records exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn not_listening(username: &str, track_id: TrackId) -> StoreError {
        StoreError::NotListening {
            username: username.to_owned(),
            track_id,
        }
    }
}

impl Default for MemoryListenerStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl ListenerStore for MemoryListenerStore {
    async fn start_listening(
        &self,
        username: &str,
        track_id: TrackId,
        position: f64,
    ) -> Result<(), StoreError> {
        let record = Record {
            listener: Listener::new(username, track_id, position),
            expires_at: Instant::now() + self.ttl,
        };
        if let Some(prev) = self.records.write().insert(username.to_owned(), record) {
            if prev.listener.track_id != track_id {
                debug!(
                    username,
                    from = %prev.listener.track_id,
                    to = %track_id,
                    "listener record moved to another track"
                );
            }
        }
        Ok(())
    }

    async fn update_position(
        &self,
        username: &str,
        track_id: TrackId,
        position: f64,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut records = self.records.write();
        match records.get_mut(username) {
            Some(record) if record.is_live(now) && record.listener.track_id == track_id => {
                record.listener.position = position;
                record.expires_at = now + self.ttl;
                Ok(())
            }
            _ => Err(Self::not_listening(username, track_id)),
        }
    }

    async fn stop_listening(&self, username: &str, track_id: TrackId) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut records = self.records.write();
        match records.get(username) {
            Some(record) if record.listener.track_id == track_id => {
                let live = record.is_live(now);
                let _ = records.remove(username);
                if live {
                    Ok(())
                } else {
                    Err(Self::not_listening(username, track_id))
                }
            }
            _ => Err(Self::not_listening(username, track_id)),
        }
    }

    async fn current_listeners(&self, track_id: TrackId) -> Result<Vec<Listener>, StoreError> {
        let now = Instant::now();
        let mut listeners: Vec<Listener> = self
            .records
            .read()
            .values()
            .filter(|r| r.is_live(now) && r.listener.track_id == track_id)
            .map(|r| r.listener.clone())
            .collect();
        listeners.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(listeners)
    }

    async fn currently_listening(&self, username: &str) -> Result<Option<Listener>, StoreError> {
        let now = Instant::now();
        Ok(self
            .records
            .read()
            .get(username)
            .filter(|r| r.is_live(now))
            .map(|r| r.listener.clone()))
    }
}
