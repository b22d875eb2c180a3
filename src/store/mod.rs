//! Persistent chat storage over SQLite.
//!
//! [`ChatStore`] is constructed explicitly at startup and handed to the
//! server through application state; nothing here is a process-wide
//! singleton, so tests run against [`ChatStore::open_in_memory`].
//!
//! All conversation and message operations are owner-scoped: a conversation
//! that does not exist and one owned by someone else both surface as
//! [`StoreError::ConversationNotFound`], which keeps record ids
//! non-enumerable.

mod conversations;
mod messages;
mod users;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_rusqlite::Connection;

use crate::relay::Role;

/// Errors from chat storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `SQLite` error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),

    /// Conversation absent or owned by another user.
    #[error("conversation not found")]
    ConversationNotFound,

    /// User record absent.
    #[error("user not found")]
    UserNotFound,

    /// Rename with an empty title.
    #[error("title must not be empty")]
    EmptyTitle,

    /// A stored message carries a role this build does not know.
    #[error("invalid role in stored message: {0}")]
    InvalidRole(String),
}

/// Convenience result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A registered user.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable identifier.
    pub id: String,
    /// Unique email address.
    pub email: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// A conversation owned by one user.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Stable identifier.
    pub id: String,
    /// User-editable title.
    pub title: String,
    /// Owning user id.
    pub owner_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Bumped whenever a message is appended.
    pub updated_at: DateTime<Utc>,
}

/// A conversation annotated with its message count, as listed in the
/// sidebar.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// The conversation record.
    #[serde(flatten)]
    pub conversation: Conversation,
    /// Number of persisted messages.
    pub message_count: i64,
}

/// One immutable message within a conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Stable identifier.
    pub id: String,
    /// Parent conversation id.
    pub conversation_id: String,
    /// Message author.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Model that produced an assistant turn, absent for user turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Creation time; messages order by it ascending.
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed chat store.
#[derive(Clone)]
pub struct ChatStore {
    conn: Connection,
}

impl ChatStore {
    /// Open (or create) the database at `path` and ensure the schema.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::init(conn).await
    }

    /// Open an in-memory database, used by tests.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> StoreResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    api_key_encrypted TEXT,
                    created_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL
                        REFERENCES conversations(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    model_used TEXT,
                    created_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_conversation
                    ON messages(conversation_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_conversations_owner
                    ON conversations(owner_id, updated_at);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Convert stored epoch milliseconds back to a UTC timestamp.
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
