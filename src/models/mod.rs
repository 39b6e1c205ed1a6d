//! Data models for Tama.
//!
//! Defines chat messages as exchanged with clients and persisted, plus the
//! user-facing profile DTOs.

mod message;
mod user;

pub use message::*;
pub use user::*;

use uuid::Uuid;

/// Generate a new UUID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
