//! Shared state handed to every connection.

use std::sync::Arc;

use groupchat_core::{AuthVerifier, MembershipOracle, MessageStore};
use tokio_util::sync::CancellationToken;

use crate::websocket::hub::ChannelRegistry;

/// The external services a chat server consumes.
#[derive(Clone)]
pub struct Collaborators {
    /// Credential verification.
    pub auth: Arc<dyn AuthVerifier>,
    /// Channel membership lookup.
    pub membership: Arc<dyn MembershipOracle>,
    /// Message persistence.
    pub store: Arc<dyn MessageStore>,
}

/// Everything a connection handler needs.
pub struct ChatContext {
    /// Live connections by channel.
    pub hub: Arc<ChannelRegistry>,
    /// External services.
    pub collaborators: Collaborators,
    /// Outbound mailbox slots per connection.
    pub mailbox_capacity: usize,
    /// Largest accepted chat payload in bytes.
    pub max_frame_bytes: usize,
    /// Parent of every connection's cancellation token.
    pub shutdown: CancellationToken,
}
