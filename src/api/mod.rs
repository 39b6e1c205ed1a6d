//! API Routes for Tama
//!
//! This module combines all API routes into a single router.
//! Routes are organized by domain and apply appropriate middleware.

mod auth;
mod chat;
mod files;
mod history;
pub mod status;

use axum::Router;

use crate::AppState;

/// Build the complete API router.
///
/// Route structure:
/// - /chat - Streaming chat, transcript fetch and delete (session, checked per method)
/// - /history - Recent chats (session-protected)
/// - /files/* - Uploads (session-protected) and blob serving (public)
/// - /auth/* - Authentication (public + session-protected)
/// - /health - Health check (public)
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(status::routes())
        .merge(chat::routes(state.clone()))
        .merge(history::routes(state.clone()))
        .nest("/files", files::routes(state.clone()))
        .nest("/auth", auth::routes(state))
}
