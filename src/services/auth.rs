//! Auth service for email/password accounts and web sessions.
//!
//! Passwords are hashed with argon2 (PHC strings). Sessions are random ids
//! stored server-side and handed to the browser in a cookie.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::db::{self, CreateSession, CreateUser, DbPool, Session, UpdateUser, User};
use crate::models::{new_id, UpdateProfile};
use crate::services::Clock;
use crate::{Error, Result};

/// Shortest accepted password.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Session id length
const SESSION_ID_LENGTH: usize = 32;

/// Service for authentication and session management.
#[derive(Clone)]
pub struct AuthService {
    db: DbPool,
    clock: Arc<dyn Clock>,
    session_max_age: chrono::Duration,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(db: DbPool, clock: Arc<dyn Clock>, session_max_age: chrono::Duration) -> Self {
        Self {
            db,
            clock,
            session_max_age,
        }
    }

    pub fn session_max_age(&self) -> chrono::Duration {
        self.session_max_age
    }

    /// Create an account. Duplicate emails are `AlreadyExists`.
    pub async fn register(&self, email: &str, password: &str) -> Result<User> {
        let email = normalize_email(email)?;
        validate_password(password)?;

        let user = db::create_user(
            &self.db,
            CreateUser {
                id: new_id(),
                email,
                password_hash: hash_password(password)?,
                is_pro: false,
            },
        )
        .await?;

        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Check credentials. Unknown email and wrong password look the same.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let email = normalize_email(email).map_err(|_| Error::InvalidCredentials)?;
        let user = db::get_user_by_email(&self.db, &email)
            .await?
            .ok_or(Error::InvalidCredentials)?;

        if !verify_password(&user.password_hash, password) {
            debug!(user_id = %user.id, "Password mismatch");
            return Err(Error::InvalidCredentials);
        }

        Ok(user)
    }

    /// Apply profile changes from the account owner.
    ///
    /// Changing the password requires the current one and signs out every
    /// other session of the account.
    pub async fn update_profile(
        &self,
        user_id: &str,
        current_session: &str,
        changes: UpdateProfile,
    ) -> Result<User> {
        let email = changes.email.as_deref().map(normalize_email).transpose()?;
        let password_hash = match changes.password.as_deref() {
            Some(password) => {
                let current = changes.current_password.as_deref().ok_or_else(|| {
                    Error::InvalidRequest("Current password is required".to_string())
                })?;
                let user = db::get_user(&self.db, user_id).await?;
                if !verify_password(&user.password_hash, current) {
                    debug!(user_id, "Current password mismatch");
                    return Err(Error::InvalidCredentials);
                }
                validate_password(password)?;
                Some(hash_password(password)?)
            }
            None => None,
        };
        let password_changed = password_hash.is_some();

        let user = db::update_user(
            &self.db,
            user_id,
            UpdateUser {
                email,
                password_hash,
                is_pro: None,
            },
        )
        .await?;

        if password_changed {
            let revoked =
                db::delete_user_sessions_except(&self.db, user_id, current_session).await?;
            info!(user_id, revoked, "Password changed");
        }

        Ok(user)
    }

    /// Grant or revoke Pro.
    pub async fn set_pro(&self, user_id: &str, is_pro: bool) -> Result<User> {
        db::update_user(
            &self.db,
            user_id,
            UpdateUser {
                is_pro: Some(is_pro),
                ..Default::default()
            },
        )
        .await
    }

    /// Start a new session for a user.
    pub async fn create_session(&self, user_id: &str) -> Result<Session> {
        db::create_session(
            &self.db,
            CreateSession {
                id: nanoid::nanoid!(SESSION_ID_LENGTH),
                user_id: user_id.to_string(),
                expires_at: self.clock.now() + self.session_max_age,
            },
        )
        .await
    }

    /// Resolve a session id to its user.
    ///
    /// Expired sessions are deleted. Sessions past half their lifetime are
    /// extended.
    pub async fn validate_session(&self, session_id: &str) -> Result<Option<(Session, User)>> {
        let now = self.clock.now();

        let Some((session, user)) = db::get_session_with_user(&self.db, session_id, now).await?
        else {
            // Lazy cleanup of the stale row, if any.
            db::delete_session(&self.db, session_id).await?;
            return Ok(None);
        };

        if let Ok(expires_at) = DateTime::parse_from_rfc3339(&session.expires_at) {
            let remaining = expires_at.with_timezone(&Utc) - now;
            if remaining < self.session_max_age / 2 {
                db::extend_session(&self.db, &session.id, now + self.session_max_age).await?;
                debug!(session_id = %session.id, "Session extended");
            }
        }

        Ok(Some((session, user)))
    }

    /// End a session.
    pub async fn logout(&self, session_id: &str) -> Result<()> {
        db::delete_session(&self.db, session_id).await
    }

    /// Remove every expired session.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        db::cleanup_expired_sessions(&self.db, self.clock.now()).await
    }
}

/// Trim and lower-case an email, rejecting obviously invalid ones.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(Error::InvalidRequest("Invalid email address".to_string())),
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::InvalidRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Hash a password into a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("Password hashing failed: {}", e)))
}

/// Check a password against a stored PHC string.
pub fn verify_password(password_hash: &str, password: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
