//! Listener and profile value types.

use serde::{Deserialize, Serialize};

use crate::ids::TrackId;

/// A user currently listening to a track, as reported to peers.
///
/// `position` is whatever the client last reported in seconds; the server
/// never advances it on its own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    /// Username of the listener.
    pub username: String,
    /// Display name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar reference, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Track being listened to.
    pub track_id: TrackId,
    /// Last reported playback position in seconds.
    pub position: f64,
}

impl Listener {
    /// A listener with no display information at the given position.
    pub fn new(username: impl Into<String>, track_id: TrackId, position: f64) -> Self {
        Self {
            username: username.into(),
            name: None,
            avatar: None,
            track_id,
            position,
        }
    }

    /// Fill in display information that is still missing.
    ///
    /// Values already present on the listener are kept.
    pub fn enrich(&mut self, profile: &Profile) {
        if self.name.is_none() {
            self.name.clone_from(&profile.name);
        }
        if self.avatar.is_none() {
            self.avatar.clone_from(&profile.avatar);
        }
    }
}

/// Display information for a user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar reference (URL or storage key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}
