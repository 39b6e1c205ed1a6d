//! Authentication Routes
//!
//! Email/password accounts with server-side sessions.
//!
//! Routes:
//! - POST /auth/register - Create an account and start a session
//! - POST /auth/login - Start a session
//! - POST /auth/logout - End the current session
//! - GET /auth/me - Current profile and today's quota
//! - PATCH /auth/me - Update email or password

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use tracing::info;

use crate::db::User;
use crate::middleware::{require_session, session_id_from, SessionUser, SESSION_COOKIE_NAME};
use crate::models::{Credentials, UpdateProfile, UserProfile};
use crate::services::QuotaStatus;
use crate::{AppState, Error, Result};

/// Build authentication routes.
pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/me", get(get_current_user).patch(update_current_user))
        .layer(middleware::from_fn_with_state(state, require_session));

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .merge(protected)
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Profile plus today's quota usage.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserProfile,
    pub quota: QuotaStatus,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create an account.
///
/// POST /auth/register
#[axum::debug_handler]
async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: std::result::Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(input) = payload.map_err(|e| Error::InvalidRequest(e.body_text()))?;

    let user = state.auth.register(&input.email, &input.password).await?;
    let jar = start_session(&state, jar, &user).await?;

    Ok((StatusCode::CREATED, jar, Json(UserProfile::from(&user))))
}

/// Log in with email and password.
///
/// POST /auth/login
#[axum::debug_handler]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: std::result::Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(input) = payload.map_err(|e| Error::InvalidRequest(e.body_text()))?;

    let user = state.auth.login(&input.email, &input.password).await?;
    let jar = start_session(&state, jar, &user).await?;
    info!(user_id = %user.id, "User logged in");

    Ok((jar, Json(UserProfile::from(&user))))
}

/// End the current session.
///
/// POST /auth/logout
///
/// Clears the session cookie and invalidates the session server-side,
/// whether it came from the cookie or a bearer token.
#[axum::debug_handler]
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse> {
    if let Some(session_id) = session_id_from(&jar, &headers) {
        state.auth.logout(&session_id).await?;
    }

    let cookie = Cookie::build((SESSION_COOKIE_NAME, ""))
        .path("/")
        .max_age(time::Duration::seconds(0))
        .build();

    Ok((
        jar.add(cookie),
        Json(serde_json::json!({
            "message": "Logged out successfully"
        })),
    ))
}

/// Get current authenticated user information.
///
/// GET /auth/me
#[axum::debug_handler]
async fn get_current_user(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<MeResponse>> {
    let db_user = crate::db::get_user(&state.db, &user.user_id).await?;
    let quota = state.quota.status(&user.user_id).await?;

    Ok(Json(MeResponse {
        user: UserProfile::from(&db_user),
        quota,
    }))
}

/// Update the current user's email or password.
///
/// PATCH /auth/me
#[axum::debug_handler]
async fn update_current_user(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    payload: std::result::Result<Json<UpdateProfile>, JsonRejection>,
) -> Result<Json<UserProfile>> {
    let Json(changes) = payload.map_err(|e| Error::InvalidRequest(e.body_text()))?;

    let updated = state
        .auth
        .update_profile(&user.user_id, &user.session_id, changes)
        .await?;
    Ok(Json(UserProfile::from(&updated)))
}

/// Create a session and attach its cookie.
async fn start_session(state: &AppState, jar: CookieJar, user: &User) -> Result<CookieJar> {
    let session = state.auth.create_session(&user.id).await?;
    let max_age = state.auth.session_max_age().num_seconds();

    let cookie = Cookie::build((SESSION_COOKIE_NAME, session.id))
        .path("/")
        .http_only(true)
        .secure(state.config.secure_cookies())
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age))
        .build();

    Ok(jar.add(cookie))
}
