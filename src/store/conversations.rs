//! Owner-scoped conversation operations.

use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::{ChatStore, Conversation, ConversationSummary, StoreError, StoreResult, from_millis};

/// Title assigned when a conversation is created without one.
const DEFAULT_TITLE: &str = "New Conversation";

/// Map a `SELECT id, title, owner_id, created_at, updated_at` row.
fn map_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        owner_id: row.get(2)?,
        created_at: from_millis(row.get(3)?),
        updated_at: from_millis(row.get(4)?),
    })
}

impl ChatStore {
    /// Create a conversation for `owner_id`, defaulting the title.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn create_conversation(
        &self,
        owner_id: &str,
        title: Option<&str>,
    ) -> StoreResult<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: title
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_TITLE)
                .to_string(),
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
        };

        let record = conversation.clone();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO conversations (id, title, owner_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        record.id,
                        record.title,
                        record.owner_id,
                        record.created_at.timestamp_millis(),
                        record.updated_at.timestamp_millis()
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(conversation)
    }

    /// List the owner's conversations, most recently updated first, each
    /// annotated with its message count.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn list_conversations(
        &self,
        owner_id: &str,
    ) -> StoreResult<Vec<ConversationSummary>> {
        let owner_id = owner_id.to_string();
        let summaries = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.title, c.owner_id, c.created_at, c.updated_at,
                            (SELECT COUNT(*) FROM messages m
                              WHERE m.conversation_id = c.id) AS message_count
                       FROM conversations c
                      WHERE c.owner_id = ?1
                      ORDER BY c.updated_at DESC, c.created_at DESC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![owner_id], |row| {
                        Ok(ConversationSummary {
                            conversation: map_conversation(row)?,
                            message_count: row.get(5)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(summaries)
    }

    /// Fetch a conversation the caller owns.
    ///
    /// # Errors
    /// Returns [`StoreError::ConversationNotFound`] when the conversation is
    /// absent or owned by another user.
    pub async fn find_conversation(
        &self,
        id: &str,
        owner_id: &str,
    ) -> StoreResult<Conversation> {
        let id = id.to_string();
        let owner_id = owner_id.to_string();
        let row = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, title, owner_id, created_at, updated_at
                       FROM conversations WHERE id = ?1 AND owner_id = ?2",
                )?;
                let row = stmt
                    .query_row(rusqlite::params![id, owner_id], map_conversation)
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.ok_or(StoreError::ConversationNotFound)
    }

    /// Rename a conversation the caller owns. The title must be non-empty;
    /// renaming does not bump `updated_at`.
    ///
    /// # Errors
    /// Returns [`StoreError::EmptyTitle`] for a blank title and
    /// [`StoreError::ConversationNotFound`] for an unowned conversation.
    pub async fn rename_conversation(
        &self,
        id: &str,
        owner_id: &str,
        title: &str,
    ) -> StoreResult<Conversation> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::EmptyTitle);
        }

        let id = id.to_string();
        let owner_id = owner_id.to_string();
        let title = title.to_string();
        let row = self
            .conn()
            .call(move |conn| {
                let rows = conn.execute(
                    "UPDATE conversations SET title = ?1 WHERE id = ?2 AND owner_id = ?3",
                    rusqlite::params![title, id, owner_id],
                )?;
                if rows == 0 {
                    return Ok(None);
                }
                let mut stmt = conn.prepare(
                    "SELECT id, title, owner_id, created_at, updated_at
                       FROM conversations WHERE id = ?1",
                )?;
                let row = stmt
                    .query_row(rusqlite::params![id], map_conversation)
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.ok_or(StoreError::ConversationNotFound)
    }

    /// Delete a conversation the caller owns, cascading to its messages.
    ///
    /// # Errors
    /// Returns [`StoreError::ConversationNotFound`] for an unowned
    /// conversation.
    pub async fn delete_conversation(&self, id: &str, owner_id: &str) -> StoreResult<()> {
        let id = id.to_string();
        let owner_id = owner_id.to_string();
        let deleted = self
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let owned: Option<String> = tx
                    .query_row(
                        "SELECT id FROM conversations WHERE id = ?1 AND owner_id = ?2",
                        rusqlite::params![id, owner_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if owned.is_none() {
                    return Ok(false);
                }
                tx.execute(
                    "DELETE FROM messages WHERE conversation_id = ?1",
                    rusqlite::params![id],
                )?;
                tx.execute(
                    "DELETE FROM conversations WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !deleted {
            return Err(StoreError::ConversationNotFound);
        }
        Ok(())
    }
}
