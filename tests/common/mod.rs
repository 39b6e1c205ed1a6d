//! Common test utilities and helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tama_chat::config::Config;
use tama_chat::db::{self, DbPool};
use tama_chat::services::FixedClock;
use tama_chat::AppState;
use tama_llm::{ChatModel, CompletionRequest, TokenStream};
use tempfile::TempDir;

/// Provider detail a failing [`MockModel`] reports; must never reach clients.
pub const PROVIDER_FAILURE_DETAIL: &str = "upstream 502 from https://llm.internal/v1?key=hunter2";

/// Model that answers every request with the same tokens and counts calls.
pub struct MockModel {
    tokens: Vec<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockModel {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Model whose stream cannot be opened.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn stream(&self, _request: CompletionRequest) -> tama_llm::Result<TokenStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(tama_llm::Error::Llm(PROVIDER_FAILURE_DETAIL.to_string()));
        }
        let tokens: Vec<tama_llm::Result<String>> =
            self.tokens.iter().cloned().map(Ok).collect();
        Ok(stream::iter(tokens).boxed())
    }
}

fn default_model() -> MockModel {
    MockModel::new(&["Xin ", "chào", "!"])
}

/// A fully wired application over a throwaway database.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub clock: Arc<FixedClock>,
    pub model: Arc<MockModel>,
    pub dir: TempDir,
}

impl TestApp {
    /// In-memory database.
    pub async fn new() -> Self {
        Self::build(None, default_model()).await
    }

    /// On-disk database, for tests that need several connections.
    pub async fn on_disk() -> Self {
        Self::build(Some("tama.db"), default_model()).await
    }

    /// In-memory database with a custom model.
    pub async fn with_model(model: MockModel) -> Self {
        Self::build(None, model).await
    }

    async fn build(db_file: Option<&str>, model: MockModel) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::for_testing(dir.path().join("uploads").to_string_lossy());
        if let Some(file) = db_file {
            config.database.path = dir.path().join(file).to_string_lossy().into_owned();
        }

        let pool = db::init_pool(&config.database.path).await.expect("pool");
        db::initialize_schema(&pool).await.expect("schema");

        let clock = Arc::new(FixedClock::new(
            "2024-05-01T12:00:00Z".parse().expect("timestamp"),
        ));
        let model = Arc::new(model);
        let state = AppState::from_parts(pool, config, model.clone(), clock.clone());
        let router = tama_chat::app(state.clone());

        Self {
            state,
            router,
            clock,
            model,
            dir,
        }
    }

    pub fn db(&self) -> &DbPool {
        &self.state.db
    }

    /// Register a user and return (user id, session id).
    pub async fn user(&self, email: &str) -> (String, String) {
        let user = self
            .state
            .auth
            .register(email, "password1")
            .await
            .expect("register");
        let session = self
            .state
            .auth
            .create_session(&user.id)
            .await
            .expect("session");
        (user.id, session.id)
    }

    /// Force a user's counter to a given state.
    pub async fn set_counter(&self, user_id: &str, count: i64, date: &str) {
        sqlx::query("UPDATE users SET request_count = ?, request_date = ? WHERE id = ?")
            .bind(count)
            .bind(date)
            .bind(user_id)
            .execute(self.db())
            .await
            .expect("set counter");
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.expect("response")
    }
}

/// Extract JSON body from response
pub async fn extract_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Extract body as text
pub async fn extract_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Create a GET request
pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    with_auth(Request::builder().uri(uri), token)
        .body(Body::empty())
        .unwrap()
}

/// Create a POST request with JSON body
pub fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    post_raw(uri, token, serde_json::to_string(&body).unwrap())
}

/// Create a POST request with a raw (possibly malformed) JSON body
pub fn post_raw(uri: &str, token: Option<&str>, body: String) -> Request<Body> {
    with_auth(Request::builder().method("POST").uri(uri), token)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// Create a PATCH request with JSON body
pub fn patch_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    with_auth(Request::builder().method("PATCH").uri(uri), token)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Create a DELETE request
pub fn delete_request(uri: &str, token: Option<&str>) -> Request<Body> {
    with_auth(Request::builder().method("DELETE").uri(uri), token)
        .body(Body::empty())
        .unwrap()
}

fn with_auth(builder: axum::http::request::Builder, token: Option<&str>) -> axum::http::request::Builder {
    match token {
        Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
        None => builder,
    }
}

/// Body for POST /chat with a single user message.
pub fn chat_body(id: &str, text: &str) -> Value {
    serde_json::json!({
        "id": id,
        "messages": [
            { "id": "m1", "role": "user", "content": text }
        ]
    })
}
