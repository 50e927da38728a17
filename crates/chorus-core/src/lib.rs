//! # chorus-core
//!
//! Shared vocabulary for the chorus listening-session server.
//!
//! - **IDs**: [`TrackId`] and [`ConnectionId`]
//! - **Listeners**: the [`Listener`] projection and user [`Profile`]
//! - **Protocol**: `{t, p}` frames, [`InboundEvent`] decoding and
//!   [`OutboundEvent`] encoding
//! - **Errors**: [`StoreError`] and [`ProtocolError`] via `thiserror`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod listener;
pub mod logging;
pub mod protocol;

pub use errors::{ProtocolError, StoreError};
pub use ids::{ConnectionId, TrackId};
pub use listener::{Listener, Profile};
pub use protocol::{EventType, Frame, InboundEvent, OutboundEvent};
