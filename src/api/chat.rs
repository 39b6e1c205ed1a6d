//! Chat Routes
//!
//! Routes:
//! - POST /chat - Stream a reply for a conversation (quota-gated)
//! - GET /chat?id= - Fetch a stored transcript
//! - DELETE /chat?id= - Delete a chat owned by the caller

use std::convert::Infallible;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Extension, Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::config::DAILY_REQUEST_LIMIT;
use crate::db;
use crate::middleware::{optional_session, SessionUser};
use crate::models::{normalize_messages, Message};
use crate::services::StreamEvent;
use crate::{AppState, Error, Result};

/// Shown on every streamed failure.
const STREAM_ERROR_MESSAGE: &str = "Generation failed";

/// Build chat routes.
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/chat",
            get(get_chat).post(send_message).delete(delete_chat),
        )
        .layer(middleware::from_fn_with_state(state, optional_session))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct ChatIdQuery {
    pub id: Option<String>,
}

impl ChatIdQuery {
    fn require_id(self) -> Result<String> {
        self.id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::InvalidRequest("Missing id".to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct ChatMessagesResponse {
    pub messages: Vec<Message>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Stream a reply to the conversation.
///
/// POST /chat
///
/// Body is validated before authentication; the quota is charged before the
/// provider is called. The response is `text/event-stream` with `token`,
/// `done` and `error` events.
#[axum::debug_handler]
async fn send_message(
    State(state): State<AppState>,
    user: Option<Extension<SessionUser>>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let Json(request) = payload.map_err(|e| Error::InvalidRequest(e.body_text()))?;
    if request.id.trim().is_empty() {
        return Err(Error::InvalidRequest("Missing chat id".to_string()));
    }

    let Extension(user) = user.ok_or(Error::Unauthenticated)?;

    let decision = state.quota.check_and_increase(&user.user_id).await?;
    if !decision.allowed {
        return Err(Error::RateLimited(format!(
            "You have used all {} requests for today. Upgrade to Pro for unlimited access.",
            DAILY_REQUEST_LIMIT
        )));
    }

    let history = normalize_messages(request.messages, state.clock.now());
    if history.is_empty() {
        return Err(Error::InvalidRequest("No messages to send".to_string()));
    }

    debug!(chat_id = %request.id, user_id = %user.user_id, messages = history.len(), "Starting generation");

    let events = state
        .chat
        .generate(request.id, user.user_id, history)
        .await?;

    let stream = ReceiverStream::new(events).map(|event| Ok(to_sse_event(event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Fetch a stored transcript.
///
/// GET /chat?id=
#[axum::debug_handler]
async fn get_chat(
    State(state): State<AppState>,
    Query(query): Query<ChatIdQuery>,
) -> Result<Json<ChatMessagesResponse>> {
    let id = query.require_id()?;
    let chat = db::get_chat(&state.db, &id).await?;

    Ok(Json(ChatMessagesResponse {
        messages: chat.messages_vec()?,
    }))
}

/// Delete a chat owned by the caller.
///
/// DELETE /chat?id=
#[axum::debug_handler]
async fn delete_chat(
    State(state): State<AppState>,
    user: Option<Extension<SessionUser>>,
    Query(query): Query<ChatIdQuery>,
) -> Result<Json<serde_json::Value>> {
    let id = query.require_id()?;
    let Extension(user) = user.ok_or(Error::Unauthenticated)?;

    let chat = db::get_chat(&state.db, &id).await?;
    if chat.user_id != user.user_id {
        return Err(Error::Forbidden);
    }

    db::delete_chat(&state.db, &id).await?;
    info!(chat_id = %id, user_id = %user.user_id, "Chat deleted");

    Ok(Json(serde_json::json!({ "message": "Chat deleted" })))
}

fn to_sse_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Token(token) => Event::default()
            .event("token")
            .data(serde_json::Value::String(token).to_string()),
        StreamEvent::Done { message_id } => Event::default()
            .event("done")
            .data(serde_json::json!({ "messageId": message_id }).to_string()),
        StreamEvent::Error => Event::default()
            .event("error")
            .data(serde_json::json!({ "error": STREAM_ERROR_MESSAGE }).to_string()),
    }
}
