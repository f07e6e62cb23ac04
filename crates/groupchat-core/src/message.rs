//! Persisted chat messages and their embedded author profile.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChannelId, MessageId, UserId};

/// Public profile embedded in every broadcast message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthorSummary {
    /// Author id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Avatar URL (may be empty).
    pub avatar_url: String,
    /// When the account was created (RFC 3339).
    pub created_at: String,
}

/// A validated inbound message on its way to the store.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    /// Target channel.
    pub channel_id: ChannelId,
    /// Authenticated author.
    pub author_id: UserId,
    /// Validated JSON body, stored as-is.
    pub body: Value,
}

/// A stored message, immutable once created and broadcast by value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    /// Row id.
    pub id: MessageId,
    /// Channel the message belongs to.
    pub channel_id: ChannelId,
    /// Author id.
    #[serde(rename = "user_id")]
    pub author_id: UserId,
    /// Structured body as sent by the author.
    pub body: Value,
    /// Insert time (RFC 3339).
    pub created_at: String,
    /// Author profile.
    #[serde(rename = "user")]
    pub author: AuthorSummary,
}
