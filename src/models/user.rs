//! User-facing account models.

use serde::{Deserialize, Serialize};

use crate::db::User;

/// Account profile returned by the auth routes. Never carries the hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub is_pro: bool,
    pub created_at: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            is_pro: user.is_pro,
            created_at: user.created_at.clone(),
        }
    }
}

/// Email and password pair for register and login.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Profile changes; absent fields are left alone.
///
/// A new password is only accepted together with the current one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfile {
    pub email: Option<String>,
    pub password: Option<String>,
    pub current_password: Option<String>,
}
