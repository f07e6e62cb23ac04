//! Narrow interfaces to the collaborators the chat core consumes.
//!
//! Implementations live outside this crate (`groupchat-auth`,
//! `groupchat-store`); tests substitute in-memory fakes.

use async_trait::async_trait;

use crate::errors::{AuthError, ServiceError};
use crate::ids::{ChannelId, UserId};
use crate::message::{NewMessage, PersistedMessage};

/// Validates a bearer credential and yields the user it was issued to.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    /// Verify `token` and return its user id.
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Decides whether a user may read and write in a channel.
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    /// Whether `user_id` belongs to `channel_id`.
    async fn is_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool, ServiceError>;
}

/// Durably stores inbound messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist `message` and return it enriched with the author's profile.
    async fn persist(&self, message: NewMessage) -> Result<PersistedMessage, ServiceError>;
}
