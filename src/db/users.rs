//! User, session and quota counter database queries.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{timestamp, DbPool};

// ============================================================================
// User Types
// ============================================================================

/// User record from the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_pro: bool,
    /// Only meaningful when `request_date` is today.
    pub request_count: i64,
    /// `YYYY-MM-DD` (UTC) of the last metered request.
    pub request_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Requests counted against `today`; a stale date counts as zero.
    pub fn requests_on(&self, today: &str) -> i64 {
        if self.request_date.as_deref() == Some(today) {
            self.request_count
        } else {
            0
        }
    }
}

/// Input for creating a new user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub is_pro: bool,
}

/// Input for updating a user.
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub is_pro: Option<bool>,
}

// ============================================================================
// Session Types
// ============================================================================

/// Web session record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub expires_at: String,
    pub created_at: String,
}

/// Input for creating a session.
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// User Queries
// ============================================================================

/// Create a new user.
pub async fn create_user(pool: &DbPool, input: CreateUser) -> Result<User> {
    let now = timestamp(Utc::now());
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, password_hash, is_pro, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&input.id)
    .bind(&input.email)
    .bind(&input.password_hash)
    .bind(input.is_pro)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            Error::AlreadyExists(format!("User with email {} already exists", input.email))
        }
        _ => Error::Database(e),
    })
}

/// Get a user by ID.
pub async fn get_user(pool: &DbPool, id: &str) -> Result<User> {
    find_user(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("User not found: {}", id)))
}

/// Get a user by ID, if present.
pub async fn find_user(pool: &DbPool, id: &str) -> Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(Error::Database)
}

/// Get a user by (already normalized) email.
pub async fn get_user_by_email(pool: &DbPool, email: &str) -> Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(Error::Database)
}

/// Update a user. Absent fields keep their stored value.
pub async fn update_user(pool: &DbPool, id: &str, input: UpdateUser) -> Result<User> {
    let email = input.email.clone();
    sqlx::query_as::<_, User>(
        r#"
        UPDATE users SET
            email = COALESCE(?, email),
            password_hash = COALESCE(?, password_hash),
            is_pro = COALESCE(?, is_pro),
            updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(input.email)
    .bind(input.password_hash)
    .bind(input.is_pro)
    .bind(timestamp(Utc::now()))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => Error::AlreadyExists(
            format!("User with email {} already exists", email.unwrap_or_default()),
        ),
        _ => Error::Database(e),
    })?
    .ok_or_else(|| Error::NotFound(format!("User not found: {}", id)))
}

// ============================================================================
// Quota Counter Queries
// ============================================================================

/// Take one metered request for `today` if the user is below `limit`.
///
/// Read, decide and write happen in a single UPDATE, so concurrent callers
/// cannot both take the last slot. A stale `request_date` restarts the count
/// at 1. Returns false when no row changed: the user is unknown, is Pro, or is
/// at the limit.
pub async fn take_daily_request(
    pool: &DbPool,
    user_id: &str,
    today: &str,
    limit: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE users SET
            request_count = CASE WHEN request_date IS ? THEN request_count + 1 ELSE 1 END,
            request_date = ?,
            updated_at = ?
        WHERE id = ?
          AND is_pro = 0
          AND (request_date IS NOT ? OR request_count < ?)
        "#,
    )
    .bind(today)
    .bind(today)
    .bind(timestamp(now))
    .bind(user_id)
    .bind(today)
    .bind(limit)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

// ============================================================================
// Session Queries
// ============================================================================

/// Create a new session.
pub async fn create_session(pool: &DbPool, input: CreateSession) -> Result<Session> {
    sqlx::query_as::<_, Session>(
        r#"
        INSERT INTO sessions (id, user_id, expires_at, created_at)
        VALUES (?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&input.id)
    .bind(&input.user_id)
    .bind(timestamp(input.expires_at))
    .bind(timestamp(Utc::now()))
    .fetch_one(pool)
    .await
    .map_err(Error::Database)
}

/// Get a valid (non-expired) session by ID.
pub async fn get_valid_session(
    pool: &DbPool,
    id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Session>> {
    sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ? AND expires_at > ?")
        .bind(id)
        .bind(timestamp(now))
        .fetch_optional(pool)
        .await
        .map_err(Error::Database)
}

/// Get session with associated user.
pub async fn get_session_with_user(
    pool: &DbPool,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<(Session, User)>> {
    let session = match get_valid_session(pool, session_id, now).await? {
        Some(s) => s,
        None => return Ok(None),
    };

    match find_user(pool, &session.user_id).await? {
        Some(user) => Ok(Some((session, user))),
        None => Ok(None),
    }
}

/// Move a session's expiry.
pub async fn extend_session(pool: &DbPool, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ?")
        .bind(timestamp(expires_at))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a session.
pub async fn delete_session(pool: &DbPool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete every session of a user except `keep`.
pub async fn delete_user_sessions_except(pool: &DbPool, user_id: &str, keep: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE user_id = ? AND id != ?")
        .bind(user_id)
        .bind(keep)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Delete expired sessions.
/// Uses idx_sessions_expires index.
pub async fn cleanup_expired_sessions(pool: &DbPool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(timestamp(now))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
