//! Server, auth, store, and logging settings.
//!
//! These are grouped here because they are all small and server-oriented.

use chorus_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Network and connection-lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP/WebSocket port.
    pub port: u16,
    /// Outbound frames a connection may have queued before it is dropped.
    pub queue_capacity: usize,
    /// Seconds between server-initiated Ping frames.
    pub ping_interval_secs: u64,
    /// Seconds without any inbound frame before a connection is closed.
    pub read_timeout_secs: u64,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            queue_capacity: 256,
            ping_interval_secs: 30,
            read_timeout_secs: 60,
            max_message_size: 512,
            max_connections: 1000,
        }
    }
}

/// Token verification settings for the WebSocket upgrade.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 secret used to verify bearer tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    /// Required `iss` claim, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Listener store and identity directory settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Seconds a listening record survives without being refreshed.
    pub listener_ttl_secs: u64,
    /// JSON file of user profiles loaded into the identity directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles_path: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            listener_ttl_secs: 24 * 60 * 60,
            profiles_path: None,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
