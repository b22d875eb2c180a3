//! User and session operations.
//!
//! Sessions are opaque bearer tokens; this is deliberately the thinnest
//! identity layer that makes the 401 surface real. Account flows live
//! outside this service.

use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::{ChatStore, StoreError, StoreResult, User, from_millis};

impl ChatStore {
    /// Create a user with a unique email.
    ///
    /// # Errors
    /// Returns an error if the email is already registered or storage fails.
    pub async fn create_user(&self, email: &str) -> StoreResult<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };

        let record = user.clone();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, email, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![
                        record.id,
                        record.email,
                        record.created_at.timestamp_millis()
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(user)
    }

    /// Look up a user by email.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.to_string();
        let row = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT id, email, created_at FROM users WHERE email = ?1")?;
                let row = stmt
                    .query_row(rusqlite::params![email], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
                    })
                    .optional()?;
                Ok(row)
            })
            .await?;

        Ok(row.map(|(id, email, created_ms)| User {
            id,
            email,
            created_at: from_millis(created_ms),
        }))
    }

    /// Store the encrypted API-key blob for a user, overwriting any previous
    /// value. Rotation is a plain overwrite; there is no versioning.
    ///
    /// # Errors
    /// Returns [`StoreError::UserNotFound`] if the user does not exist.
    pub async fn set_api_key(&self, user_id: &str, blob: &str) -> StoreResult<()> {
        let user_id = user_id.to_string();
        let blob = blob.to_string();
        let updated = self
            .conn()
            .call(move |conn| {
                let rows = conn.execute(
                    "UPDATE users SET api_key_encrypted = ?1 WHERE id = ?2",
                    rusqlite::params![blob, user_id],
                )?;
                Ok(rows)
            })
            .await?;

        if updated == 0 {
            return Err(StoreError::UserNotFound);
        }
        Ok(())
    }

    /// Fetch the encrypted API-key blob for a user, `None` when no key has
    /// been configured.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn api_key_blob(&self, user_id: &str) -> StoreResult<Option<String>> {
        let user_id = user_id.to_string();
        let blob = self
            .conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT api_key_encrypted FROM users WHERE id = ?1")?;
                let row: Option<Option<String>> = stmt
                    .query_row(rusqlite::params![user_id], |row| row.get(0))
                    .optional()?;
                Ok(row.flatten())
            })
            .await?;
        Ok(blob)
    }

    /// Whether the user has an API key configured.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn has_api_key(&self, user_id: &str) -> StoreResult<bool> {
        Ok(self.api_key_blob(user_id).await?.is_some())
    }

    /// Mint an opaque session token for a user.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn create_session(&self, user_id: &str) -> StoreResult<String> {
        let token = Uuid::new_v4().to_string();
        let record = token.clone();
        let user_id = user_id.to_string();

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![record, user_id, Utc::now().timestamp_millis()],
                )?;
                Ok(())
            })
            .await?;

        Ok(token)
    }

    /// Resolve a session token to its user id, `None` for unknown tokens.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn resolve_session(&self, token: &str) -> StoreResult<Option<String>> {
        let token = token.to_string();
        let user_id = self
            .conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT user_id FROM sessions WHERE token = ?1")?;
                let row = stmt
                    .query_row(rusqlite::params![token], |row| row.get(0))
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(user_id)
    }
}
