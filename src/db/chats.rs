//! Chat transcript database queries.
//!
//! A chat's messages live in one JSON text column, capped to the most
//! recent [`MAX_CHAT_MESSAGES`] on every save.

use crate::config::{MAX_CHAT_MESSAGES, MAX_HISTORY_CHATS};
use crate::models::{keep_most_recent, Message};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{timestamp, DbPool};

/// Chat record from the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub messages: String, // JSON array
    pub created_at: String,
    pub updated_at: String,
}

impl Chat {
    /// Parse the stored transcript.
    pub fn messages_vec(&self) -> Result<Vec<Message>> {
        Ok(serde_json::from_str(&self.messages)?)
    }

    /// Text of the first user message, used as a title in listings.
    pub fn title(&self) -> Option<String> {
        self.messages_vec()
            .ok()?
            .into_iter()
            .find(|m| m.role == crate::models::Role::User && !m.content.is_blank())
            .map(|m| m.content.as_str().chars().take(80).collect())
    }
}

/// Create or overwrite a chat owned by `user_id`.
///
/// The first save records the owner; later saves replace the transcript and
/// bump `updated_at`. A save against a chat owned by someone else changes
/// nothing and fails with `Forbidden`.
pub async fn save_chat(
    pool: &DbPool,
    id: &str,
    user_id: &str,
    messages: Vec<Message>,
    now: DateTime<Utc>,
) -> Result<()> {
    let messages = keep_most_recent(messages, MAX_CHAT_MESSAGES);
    let json = serde_json::to_string(&messages)?;
    let now = timestamp(now);

    let result = sqlx::query(
        r#"
        INSERT INTO chats (id, user_id, messages, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            messages = excluded.messages,
            updated_at = excluded.updated_at
        WHERE chats.user_id = excluded.user_id
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(&json)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Forbidden);
    }

    Ok(())
}

/// Get a chat by ID.
pub async fn get_chat(pool: &DbPool, id: &str) -> Result<Chat> {
    sqlx::query_as::<_, Chat>("SELECT * FROM chats WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Chat not found: {}", id)))
}

/// Most recently updated chats for a user.
/// Uses idx_chats_user_updated index.
pub async fn list_user_chats(pool: &DbPool, user_id: &str) -> Result<Vec<Chat>> {
    sqlx::query_as::<_, Chat>(
        r#"
        SELECT * FROM chats
        WHERE user_id = ?
        ORDER BY updated_at DESC
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(MAX_HISTORY_CHATS)
    .fetch_all(pool)
    .await
    .map_err(Error::Database)
}

/// Delete a chat. Ownership is the caller's concern.
pub async fn delete_chat(pool: &DbPool, id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM chats WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Chat not found: {}", id)));
    }

    Ok(())
}
