//! Owner-scoped message operations.
//!
//! Messages are immutable once persisted; there is no update path. Appending
//! bumps the parent conversation's `updated_at` inside the same transaction,
//! so recency ordering and the append are never observed apart.

use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::relay::Role;

use super::{ChatStore, Message, StoreError, StoreResult, from_millis};

/// Raw message row before role validation.
type MessageRow = (String, String, String, String, Option<String>, i64);

impl ChatStore {
    /// Append a message to a conversation the caller owns.
    ///
    /// # Errors
    /// Returns [`StoreError::ConversationNotFound`] when the conversation is
    /// absent or owned by another user.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        owner_id: &str,
        role: Role,
        content: &str,
        model_used: Option<&str>,
    ) -> StoreResult<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            model_used: model_used.map(str::to_string),
            created_at: Utc::now(),
        };

        let record = message.clone();
        let owner_id = owner_id.to_string();
        let inserted = self
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let owned: Option<String> = tx
                    .query_row(
                        "SELECT id FROM conversations WHERE id = ?1 AND owner_id = ?2",
                        rusqlite::params![record.conversation_id, owner_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if owned.is_none() {
                    return Ok(false);
                }

                let now_ms = record.created_at.timestamp_millis();
                tx.execute(
                    "INSERT INTO messages
                         (id, conversation_id, role, content, model_used, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        record.id,
                        record.conversation_id,
                        record.role.as_str(),
                        record.content,
                        record.model_used,
                        now_ms
                    ],
                )?;
                tx.execute(
                    "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                    rusqlite::params![now_ms, record.conversation_id],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::ConversationNotFound);
        }
        Ok(message)
    }

    /// List a conversation's messages in creation order.
    ///
    /// # Errors
    /// Returns [`StoreError::ConversationNotFound`] when the conversation is
    /// absent or owned by another user.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        owner_id: &str,
    ) -> StoreResult<Vec<Message>> {
        self.find_conversation(conversation_id, owner_id).await?;

        let conversation_id = conversation_id.to_string();
        let rows: Vec<MessageRow> = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, conversation_id, role, content, model_used, created_at
                       FROM messages
                      WHERE conversation_id = ?1
                      ORDER BY created_at ASC, rowid ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![conversation_id], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, conversation_id, role, content, model_used, created_ms)| {
                let role = Role::parse(&role).ok_or(StoreError::InvalidRole(role))?;
                Ok(Message {
                    id,
                    conversation_id,
                    role,
                    content,
                    model_used,
                    created_at: from_millis(created_ms),
                })
            })
            .collect()
    }
}
