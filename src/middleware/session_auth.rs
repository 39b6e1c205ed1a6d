//! Session-based authentication middleware.
//!
//! # Session Flow
//!
//! 1. User registers or logs in via `/auth/*`
//! 2. Server creates session and sets `tama_session` cookie
//! 3. Subsequent requests include the cookie (or `Authorization: Bearer <id>`),
//!    validated by this middleware
//! 4. Session expires after configured duration or on logout
//!
//! # Security Model
//!
//! - Session IDs are cryptographically random (nanoid)
//! - Sessions are stored server-side in database
//! - Cookie is HttpOnly, Secure (when served over https), SameSite=Lax

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use crate::{error::Error, AppState};

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "tama_session";

/// User context injected into request extensions after successful session validation.
#[derive(Clone, Debug)]
pub struct SessionUser {
    /// Unique user identifier
    pub user_id: String,
    pub email: String,
    pub is_pro: bool,
    /// Session the request was authenticated with
    pub session_id: String,
}

/// Session id from the cookie, falling back to a bearer token.
pub fn session_id_from(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Middleware that requires a valid session.
///
/// # Errors
///
/// Returns 401 Unauthorized if no session id is present, or the session is
/// unknown, expired, or belongs to a deleted user.
///
/// # Example
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/history", get(list_history))
///     .layer(middleware::from_fn_with_state(state.clone(), require_session));
/// ```
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, Error> {
    let session_id = session_id_from(&jar, req.headers()).ok_or(Error::Unauthenticated)?;

    let session_user = validate_session(&state, &session_id)
        .await?
        .ok_or(Error::Unauthenticated)?;

    req.extensions_mut().insert(session_user);

    Ok(next.run(req).await)
}

/// Optional session middleware - doesn't fail if no session, just doesn't inject user.
///
/// Handlers that must validate their input before deciding on authentication
/// take `Option<Extension<SessionUser>>`.
pub async fn optional_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(session_id) = session_id_from(&jar, req.headers()) {
        match validate_session(&state, &session_id).await {
            Ok(Some(session_user)) => {
                req.extensions_mut().insert(session_user);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Session lookup failed"),
        }
    }

    next.run(req).await
}

/// Validate a session ID and return the session user.
async fn validate_session(state: &AppState, session_id: &str) -> Result<Option<SessionUser>, Error> {
    Ok(state
        .auth
        .validate_session(session_id)
        .await?
        .map(|(session, user)| SessionUser {
            user_id: user.id,
            email: user.email,
            is_pro: user.is_pro,
            session_id: session.id,
        }))
}
