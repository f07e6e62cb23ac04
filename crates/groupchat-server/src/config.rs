//! Server configuration.

use groupchat_core::constants::{EVICTION_THRESHOLD, MAILBOX_CAPACITY, MAX_MESSAGE_BYTES};
use serde::{Deserialize, Serialize};

/// Configuration for the chat server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Outbound mailbox slots per connection.
    pub mailbox_capacity: usize,
    /// Consecutive full-mailbox broadcasts before eviction.
    pub eviction_threshold: u32,
    /// Largest accepted chat payload in bytes.
    pub max_frame_bytes: usize,
    /// Largest WebSocket message the transport reads at all.
    pub max_transport_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            mailbox_capacity: MAILBOX_CAPACITY,
            eviction_threshold: EVICTION_THRESHOLD,
            max_frame_bytes: MAX_MESSAGE_BYTES,
            max_transport_frame_bytes: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
