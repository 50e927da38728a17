//! In-memory profile directory.
//!
//! Profiles can be preloaded from a JSON file mapping usernames to profiles:
//!
//! ```json
//! { "alice": { "name": "Alice", "avatar": "avatars/alice.png" } }
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chorus_core::{Profile, StoreError};
use parking_lot::RwLock;
use tracing::info;

use crate::traits::IdentityLookup;

/// Profiles keyed by username.
#[derive(Default)]
pub struct MemoryIdentityDirectory {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl MemoryIdentityDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a directory from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let profiles: HashMap<String, Profile> = serde_json::from_str(&content)?;
        info!(?path, count = profiles.len(), "loaded profile directory");
        Ok(Self {
            profiles: RwLock::new(profiles),
        })
    }

    /// Insert or replace the profile for `username`.
    pub fn insert(&self, username: impl Into<String>, profile: Profile) {
        let _ = self.profiles.write().insert(username.into(), profile);
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    /// Whether the directory has no users.
    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

#[async_trait]
impl IdentityLookup for MemoryIdentityDirectory {
    async fn profile(&self, username: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.read().get(username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Profile {
        Profile {
            name: Some("Alice".into()),
            avatar: Some("avatars/alice.png".into()),
        }
    }

    #[tokio::test]
    async fn lookup_known_and_unknown() {
        let dir = MemoryIdentityDirectory::new();
        dir.insert("alice", alice());

        assert_eq!(dir.profile("alice").await.unwrap(), Some(alice()));
        assert_eq!(dir.profile("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profiles.json");
        std::fs::write(
            &path,
            r#"{"alice": {"name": "Alice", "avatar": "avatars/alice.png"}, "bob": {}}"#,
        )
        .unwrap();

        let dir = MemoryIdentityDirectory::from_path(&path).unwrap();
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.profile("alice").await.unwrap(), Some(alice()));
        assert_eq!(dir.profile("bob").await.unwrap(), Some(Profile::default()));
    }

    #[test]
    fn load_errors() {
        let missing = MemoryIdentityDirectory::from_path(Path::new("/nonexistent/profiles.json"));
        assert!(matches!(missing, Err(StoreError::Io(_))));

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profiles.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(
            MemoryIdentityDirectory::from_path(&path),
            Err(StoreError::Json(_))
        ));
    }
}
