use chrono::Utc;
use groupchat_core::{ChannelId, MessageId, UserId};
use serde_json::Value;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Stored message, before the author profile is attached.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageRow {
    /// Row id.
    pub id: MessageId,
    /// Owning channel.
    pub channel_id: ChannelId,
    /// Author.
    pub user_id: UserId,
    /// JSON body.
    pub body: Value,
    /// Insert time (RFC 3339).
    pub created_at: String,
}

/// Chat messages.
#[derive(Clone, Debug)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    /// Repository over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a message body and return the stored row.
    #[instrument(skip(self, body), fields(channel_id = %channel_id, user_id = %user_id))]
    pub fn insert(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        body: &Value,
    ) -> Result<MessageRow, StoreError> {
        let encoded = serde_json::to_string(body)?;
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let _ = conn.execute(
                "INSERT INTO messages (channel_id, user_id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![channel_id.get(), user_id.get(), encoded, now],
            )?;
            Ok(MessageRow {
                id: MessageId::new(conn.last_insert_rowid()),
                channel_id,
                user_id,
                body: body.clone(),
                created_at: now,
            })
        })
    }

    /// Get a message by id.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: MessageId) -> Result<MessageRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, channel_id, user_id, body, created_at FROM messages WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.get()])?;
            let Some(row) = rows.next()? else {
                return Err(StoreError::NotFound(format!("message {id}")));
            };
            let raw: String = row_helpers::get(row, 3, "messages", "body")?;
            Ok(MessageRow {
                id: MessageId::new(row_helpers::get(row, 0, "messages", "id")?),
                channel_id: ChannelId::new(row_helpers::get(row, 1, "messages", "channel_id")?),
                user_id: UserId::new(row_helpers::get(row, 2, "messages", "user_id")?),
                body: row_helpers::parse_json(&raw, "messages", "body")?,
                created_at: row_helpers::get(row, 4, "messages", "created_at")?,
            })
        })
    }

    /// Number of messages stored for a channel.
    #[instrument(skip(self), fields(channel_id = %channel_id))]
    pub fn count(&self, channel_id: ChannelId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE channel_id = ?1",
                [channel_id.get()],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(n).unwrap_or(0))
        })
    }
}
