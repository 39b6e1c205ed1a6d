//! Middleware for Tama.
//!
//! - `session_auth` - Session cookie / bearer validation for every
//!   authenticated route

mod session_auth;

pub use session_auth::{
    optional_session, require_session, session_id_from, SessionUser, SESSION_COOKIE_NAME,
};
