use chrono::Utc;
use groupchat_core::{AuthorSummary, UserId};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Stored user, without the password hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    /// Row id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Unique login name.
    pub username: String,
    /// Unique email.
    pub email: String,
    /// Avatar URL (may be empty).
    pub avatar_url: String,
    /// Creation time (RFC 3339).
    pub created_at: String,
}

impl UserRow {
    /// Public profile embedded in broadcast messages.
    pub fn summary(&self) -> AuthorSummary {
        AuthorSummary {
            id: self.id,
            name: self.name.clone(),
            avatar_url: self.avatar_url.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

/// Fields required to create a user. The password arrives already hashed.
#[derive(Clone, Debug, Default)]
pub struct NewUser {
    /// Display name.
    pub name: String,
    /// Unique login name.
    pub username: String,
    /// Unique email.
    pub email: String,
    /// Password hash, opaque to this crate.
    pub password_hash: String,
    /// Avatar URL (may be empty).
    pub avatar_url: String,
}

const SELECT_USER: &str =
    "SELECT id, name, username, email, avatar_url, created_at FROM users WHERE id = ?1";

/// User accounts.
#[derive(Clone, Debug)]
pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    /// Repository over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a user. Duplicate username or email is a `Conflict`.
    #[instrument(skip(self, user), fields(username = %user.username))]
    pub fn create(&self, user: &NewUser) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let _ = conn.execute(
                "INSERT INTO users (name, username, email, password_hash, avatar_url, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.name,
                    user.username,
                    user.email,
                    user.password_hash,
                    user.avatar_url,
                    now
                ],
            )?;

            Ok(UserRow {
                id: UserId::new(conn.last_insert_rowid()),
                name: user.name.clone(),
                username: user.username.clone(),
                email: user.email.clone(),
                avatar_url: user.avatar_url.clone(),
                created_at: now,
            })
        })
    }

    /// Get a user by id.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(SELECT_USER)?;
            let mut rows = stmt.query([id.get()])?;
            let Some(row) = rows.next()? else {
                return Err(StoreError::NotFound(format!("user {id}")));
            };
            Ok(UserRow {
                id: UserId::new(row_helpers::get(row, 0, "users", "id")?),
                name: row_helpers::get(row, 1, "users", "name")?,
                username: row_helpers::get(row, 2, "users", "username")?,
                email: row_helpers::get(row, 3, "users", "email")?,
                avatar_url: row_helpers::get(row, 4, "users", "avatar_url")?,
                created_at: row_helpers::get(row, 5, "users", "created_at")?,
            })
        })
    }
}
