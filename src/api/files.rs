//! File Routes
//!
//! Uploads go to the content-addressed blob store and are served back
//! statically.
//!
//! Routes:
//! - POST /files/upload - Upload one file (multipart field `file`)
//! - GET /files/blob/* - Serve a stored blob

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    middleware,
    routing::post,
    Extension, Json, Router,
};
use serde::Serialize;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::MAX_UPLOAD_SIZE;
use crate::middleware::{require_session, SessionUser};
use crate::services::{resolve_content_type, validate_upload};
use crate::{AppState, Error, Result};

/// Room for multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build file routes.
pub fn routes(state: AppState) -> Router<AppState> {
    let uploads_path = state.config.storage.uploads_path.clone();

    let upload = Router::new()
        .route("/upload", post(upload_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE + MULTIPART_OVERHEAD))
        .layer(middleware::from_fn_with_state(state, require_session));

    Router::new()
        .merge(upload)
        .nest_service("/blob", ServeDir::new(uploads_path))
}

/// Upload result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub pathname: String,
    pub content_type: String,
    pub size: usize,
}

/// Upload a file.
///
/// POST /files/upload
///
/// Accepts multipart/form-data with a single file field named "file".
/// JPEG, PNG and PDF up to 5 MiB.
#[axum::debug_handler]
async fn upload_file(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        Error::InvalidRequest(format!("Failed to read multipart field: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("unnamed").to_string();
        let content_type = resolve_content_type(field.content_type(), &filename);

        let data = field.bytes().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                Error::FileTooLarge {
                    max_size: MAX_UPLOAD_SIZE,
                }
            } else {
                Error::InvalidRequest(format!("Failed to read file: {}", e))
            }
        })?;

        validate_upload(&content_type, data.len())?;

        let blob = state.blobs.put(&data, &content_type).await?;
        info!(user_id = %user.user_id, pathname = %blob.pathname, size = blob.size, "File uploaded");

        return Ok(Json(UploadResponse {
            url: format!(
                "{}/files/blob/{}",
                state.config.server.public_url.trim_end_matches('/'),
                blob.pathname
            ),
            pathname: blob.pathname,
            content_type: blob.content_type,
            size: blob.size,
        }));
    }

    Err(Error::InvalidRequest("No file uploaded".into()))
}
