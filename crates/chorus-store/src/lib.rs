//! # chorus-store
//!
//! Collaborators the session server reads and writes through:
//!
//! - [`ListenerStore`]: who is listening to which track, at what position
//! - [`IdentityLookup`]: display name and avatar for a username
//!
//! Both come with in-process implementations ([`MemoryListenerStore`],
//! [`MemoryIdentityDirectory`]) so the server runs without external services.

#![deny(unsafe_code)]

pub mod identity;
pub mod listeners;
pub mod traits;

pub use identity::MemoryIdentityDirectory;
pub use listeners::MemoryListenerStore;
pub use traits::{IdentityLookup, ListenerStore};
