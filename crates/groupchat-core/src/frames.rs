//! Acknowledgment and error frames sent to a single client.

use serde::{Deserialize, Serialize};

use crate::constants::MESSAGE_SENT;

/// `{"success": <bool>, "message": "<string>"}`.
///
/// Never broadcast; only the originating connection receives it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFrame {
    /// Whether the request succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl ResultFrame {
    /// Successful outcome with a message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Failed outcome with a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// Failed outcome carrying an error's display text.
    pub fn from_error(err: &impl std::fmt::Display) -> Self {
        Self::error(err.to_string())
    }

    /// Acknowledgment sent after a message is persisted.
    pub fn message_sent() -> Self {
        Self::ok(MESSAGE_SENT)
    }

    /// Serialize to the wire JSON text.
    pub fn to_json(&self) -> String {
        // Two plain fields; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"success":{},"message":{:?}}}"#,
                self.success, self.message
            )
        })
    }
}
