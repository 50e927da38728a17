//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]`. Each type implements
//! [`Default`] with production values, and `#[serde(default)]` lets a
//! settings file specify only the fields it wants to change.

mod server;

pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090, "queueCapacity": 512 },
///   "auth": { "jwtSecret": "..." }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChorusSettings {
    /// Settings schema version.
    pub version: String,
    /// Network and connection lifecycle.
    pub server: ServerSettings,
    /// Upgrade authentication.
    pub auth: AuthSettings,
    /// Listener store and identity directory.
    pub store: StoreSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl Default for ChorusSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            store: StoreSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}
