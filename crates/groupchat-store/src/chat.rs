//! Chat-core collaborators backed by SQLite.

use async_trait::async_trait;
use groupchat_core::{
    ChannelId, MembershipOracle, MessageStore, NewMessage, PersistedMessage, ServiceError, UserId,
};
use tracing::error;

use crate::database::Database;
use crate::memberships::MembershipRepo;
use crate::messages::MessageRepo;
use crate::users::UserRepo;

/// Membership checks and message persistence for live connections.
///
/// Repository errors are logged here with full detail and handed upward as
/// generic [`ServiceError`]s.
#[derive(Clone, Debug)]
pub struct ChatService {
    users: UserRepo,
    memberships: MembershipRepo,
    messages: MessageRepo,
}

impl ChatService {
    /// Service over `db`.
    pub fn new(db: Database) -> Self {
        Self {
            users: UserRepo::new(db.clone()),
            memberships: MembershipRepo::new(db.clone()),
            messages: MessageRepo::new(db),
        }
    }
}

#[async_trait]
impl MembershipOracle for ChatService {
    async fn is_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool, ServiceError> {
        let repo = self.memberships.clone();
        let result = tokio::task::spawn_blocking(move || repo.is_member(channel_id, user_id))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));

        result.map_err(|detail| {
            error!(%channel_id, %user_id, error = %detail, "error checking user membership");
            ServiceError::Membership { detail }
        })
    }
}

#[async_trait]
impl MessageStore for ChatService {
    async fn persist(&self, message: NewMessage) -> Result<PersistedMessage, ServiceError> {
        let messages = self.messages.clone();
        let users = self.users.clone();
        let NewMessage {
            channel_id,
            author_id,
            body,
        } = message;

        let joined = tokio::task::spawn_blocking(move || {
            let row = messages
                .insert(channel_id, author_id, &body)
                .map_err(|e| ServiceError::InsertMessage {
                    detail: e.to_string(),
                })?;
            // The row stays stored even if the author lookup fails.
            let author = users.get(author_id).map_err(|e| ServiceError::FetchUser {
                detail: e.to_string(),
            })?;
            Ok(PersistedMessage {
                id: row.id,
                channel_id: row.channel_id,
                author_id: row.user_id,
                body: row.body,
                created_at: row.created_at,
                author: author.summary(),
            })
        })
        .await;

        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(ServiceError::InsertMessage {
                detail: e.to_string(),
            }),
        };
        if let Err(ref err) = result {
            error!(%channel_id, user_id = %author_id, error = err.detail(), "{err}");
        }
        result
    }
}
