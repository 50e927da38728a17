//! # chorus-settings
//!
//! Layered configuration for the chorus server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ChorusSettings::default()`]
//! 2. **Settings file**: `~/.chorus/settings.json` (overlaid on the defaults)
//! 3. **Environment variables**: `CHORUS_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, overlay, settings_path};
pub use types::*;
