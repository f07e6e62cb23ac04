use groupchat_core::{ChannelId, UserId};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// User-to-channel membership.
#[derive(Clone, Debug)]
pub struct MembershipRepo {
    db: Database,
}

impl MembershipRepo {
    /// Repository over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Add `user_id` to `channel_id`. Joining twice is a no-op; returns
    /// whether a row was inserted.
    #[instrument(skip(self), fields(channel_id = %channel_id, user_id = %user_id))]
    pub fn join(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO memberships (user_id, channel_id) VALUES (?1, ?2)",
                [user_id.get(), channel_id.get()],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Remove `user_id` from `channel_id`; returns whether a row was deleted.
    #[instrument(skip(self), fields(channel_id = %channel_id, user_id = %user_id))]
    pub fn leave(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM memberships WHERE user_id = ?1 AND channel_id = ?2",
                [user_id.get(), channel_id.get()],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Whether `user_id` belongs to `channel_id`.
    #[instrument(skip(self), fields(channel_id = %channel_id, user_id = %user_id))]
    pub fn is_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT EXISTS (SELECT 1 FROM memberships WHERE channel_id = ?1 AND user_id = ?2)",
            )?;
            Ok(stmt.query_row([channel_id.get(), user_id.get()], |row| row.get(0))?)
        })
    }
}
