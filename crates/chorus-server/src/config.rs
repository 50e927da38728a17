//! Server configuration.

use std::time::Duration;

use chorus_settings::ServerSettings;
use serde::{Deserialize, Serialize};

use crate::websocket::session::SessionConfig;

/// Configuration for the chorus server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Seconds without inbound traffic before a connection is closed.
    pub read_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl ServerConfig {
    /// Per-connection limits derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            queue_capacity: self.queue_capacity,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1000,
            queue_capacity: 256,
            ping_interval_secs: 30,
            read_timeout_secs: 60,
            max_message_size: 512,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            queue_capacity: s.queue_capacity,
            ping_interval_secs: s.ping_interval_secs,
            read_timeout_secs: s.read_timeout_secs,
            max_message_size: s.max_message_size,
        }
    }
}
