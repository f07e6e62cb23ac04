//! Settings tree.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupchatSettings {
    /// Listener and storage.
    pub server: ServerSettings,
    /// Credential verification.
    pub auth: AuthSettings,
    /// Per-connection delivery limits.
    pub chat: ChatSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl GroupchatSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chat.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "chat.mailboxCapacity must be at least 1".into(),
            ));
        }
        if self.chat.eviction_threshold == 0 {
            return Err(SettingsError::InvalidValue(
                "chat.evictionThreshold must be at least 1".into(),
            ));
        }
        if self.chat.max_frame_bytes > self.chat.max_transport_frame_bytes {
            return Err(SettingsError::InvalidValue(format!(
                "chat.maxFrameBytes ({}) exceeds chat.maxTransportFrameBytes ({})",
                self.chat.max_frame_bytes, self.chat.max_transport_frame_bytes
            )));
        }
        Ok(())
    }

    /// The signing secret, or [`SettingsError::MissingSecret`].
    pub fn require_jwt_secret(&self) -> Result<&str> {
        self.auth
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(SettingsError::MissingSecret)
    }
}

/// Listener and storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (0 picks an ephemeral port).
    pub port: u16,
    /// SQLite database path. Relative paths resolve against `~/.groupchat`;
    /// `:memory:` keeps everything in process.
    pub db_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            db_path: "groupchat.db".to_string(),
        }
    }
}

impl ServerSettings {
    /// Whether the database lives only in memory.
    pub fn is_in_memory_db(&self) -> bool {
        self.db_path == ":memory:"
    }

    /// Database path resolved against `base` when relative.
    pub fn resolved_db_path(&self, base: &Path) -> PathBuf {
        let path = Path::new(&self.db_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }
}

/// Credential settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 signing secret shared with the token issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Per-connection delivery limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Outbound mailbox slots per connection.
    pub mailbox_capacity: usize,
    /// Consecutive full-mailbox broadcasts before a connection is evicted.
    pub eviction_threshold: u32,
    /// Largest accepted inbound chat payload, in bytes.
    pub max_frame_bytes: usize,
    /// Largest WebSocket frame the transport will read at all.
    pub max_transport_frame_bytes: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            eviction_threshold: 5,
            max_frame_bytes: 10 * 1024,
            max_transport_frame_bytes: 1024 * 1024,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
