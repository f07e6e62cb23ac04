use chrono::Utc;
use groupchat_core::ChannelId;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// Stored channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRow {
    /// Row id.
    pub id: ChannelId,
    /// Channel name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Cover image URL (may be empty).
    pub image_url: String,
    /// Creation time (RFC 3339).
    pub created_at: String,
}

/// Fields required to create a channel.
#[derive(Clone, Debug, Default)]
pub struct NewChannel {
    /// Channel name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Cover image URL.
    pub image_url: String,
}

/// Channels.
#[derive(Clone, Debug)]
pub struct ChannelRepo {
    db: Database,
}

impl ChannelRepo {
    /// Repository over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a channel.
    #[instrument(skip(self, channel), fields(name = %channel.name))]
    pub fn create(&self, channel: &NewChannel) -> Result<ChannelRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let _ = conn.execute(
                "INSERT INTO channels (name, description, image_url, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![channel.name, channel.description, channel.image_url, now],
            )?;
            Ok(ChannelRow {
                id: ChannelId::new(conn.last_insert_rowid()),
                name: channel.name.clone(),
                description: channel.description.clone(),
                image_url: channel.image_url.clone(),
                created_at: now,
            })
        })
    }

    /// Whether a channel with `id` exists.
    #[instrument(skip(self), fields(channel_id = %id))]
    pub fn exists(&self, id: ChannelId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM channels WHERE id = ?1)",
                [id.get()],
                |row| row.get(0),
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_exists() {
        let repo = ChannelRepo::new(Database::in_memory().unwrap());
        let row = repo
            .create(&NewChannel {
                name: "general".into(),
                ..NewChannel::default()
            })
            .unwrap();
        assert!(repo.exists(row.id).unwrap());
        assert!(!repo.exists(ChannelId::new(row.id.get() + 1)).unwrap());
    }
}
