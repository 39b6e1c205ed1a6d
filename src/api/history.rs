//! History Routes
//!
//! Routes:
//! - GET /history - The caller's most recently updated chats

use axum::{extract::State, middleware, routing::get, Extension, Json, Router};
use serde::Serialize;

use crate::db;
use crate::middleware::{require_session, SessionUser};
use crate::{AppState, Result};

/// Build history routes.
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/history", get(list_history))
        .layer(middleware::from_fn_with_state(state, require_session))
}

/// One entry in the chat sidebar.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// List the caller's chats, most recently updated first.
///
/// GET /history
#[axum::debug_handler]
async fn list_history(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<Vec<ChatSummary>>> {
    let chats = db::list_user_chats(&state.db, &user.user_id).await?;

    Ok(Json(
        chats
            .into_iter()
            .map(|chat| ChatSummary {
                title: chat.title(),
                id: chat.id,
                created_at: chat.created_at,
                updated_at: chat.updated_at,
            })
            .collect(),
    ))
}
