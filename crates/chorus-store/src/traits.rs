//! Collaborator traits consumed by the session server.

use async_trait::async_trait;
use chorus_core::{Listener, Profile, StoreError, TrackId};

/// Record of who is listening to what, at what position.
///
/// A user has at most one listening record. Records expire when they are not
/// refreshed within the store's time-to-live.
#[async_trait]
pub trait ListenerStore: Send + Sync {
    /// Record that `username` started listening to `track_id` at `position`.
    ///
    /// Replaces any record the user held for another track.
    async fn start_listening(
        &self,
        username: &str,
        track_id: TrackId,
        position: f64,
    ) -> Result<(), StoreError>;

    /// Update the user's position on `track_id` and refresh its expiry.
    ///
    /// Fails with [`StoreError::NotListening`] if the user has no record for
    /// that track.
    async fn update_position(
        &self,
        username: &str,
        track_id: TrackId,
        position: f64,
    ) -> Result<(), StoreError>;

    /// Remove the user's record for `track_id`.
    ///
    /// Fails with [`StoreError::NotListening`] if the user has no record for
    /// that track.
    async fn stop_listening(&self, username: &str, track_id: TrackId) -> Result<(), StoreError>;

    /// Everyone currently listening to `track_id`, ordered by username.
    async fn current_listeners(&self, track_id: TrackId) -> Result<Vec<Listener>, StoreError>;

    /// The record the user currently holds, if any.
    async fn currently_listening(&self, username: &str) -> Result<Option<Listener>, StoreError>;
}

/// Display information lookup by username.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Profile for `username`, or `None` if the user is unknown.
    async fn profile(&self, username: &str) -> Result<Option<Profile>, StoreError>;
}
