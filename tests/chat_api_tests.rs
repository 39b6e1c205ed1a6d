//! HTTP tests for /chat and /history.

mod common;

use axum::http::{header, StatusCode};
use common::{
    chat_body, delete_request, extract_json, extract_text, get_request, post_json, post_raw,
    MockModel, TestApp, PROVIDER_FAILURE_DETAIL,
};
use serde_json::json;
use tama_chat::config::DAILY_REQUEST_LIMIT;
use tama_chat::db;

const TODAY: &str = "2024-05-01";

#[tokio::test]
async fn test_chat_streams_tokens_and_persists() {
    let app = TestApp::new().await;
    let (user_id, token) = app.user("a@example.com").await;

    let response = app
        .send(post_json("/chat", Some(&token), chat_body("chat-1", "Hello")))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let body = extract_text(response).await;
    assert!(body.contains("event: token\ndata: \"Xin \""));
    assert!(body.contains("event: token\ndata: \"chào\""));
    assert!(body.contains("event: done"));
    assert!(!body.contains("event: error"));
    assert_eq!(app.model.calls(), 1);

    let chat = db::get_chat(app.db(), "chat-1").await.unwrap();
    assert_eq!(chat.user_id, user_id);

    let response = app.send(get_request("/chat?id=chat-1", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response).await;
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "Hello");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Xin chào!");

    let user = db::get_user(app.db(), &user_id).await.unwrap();
    assert_eq!(user.request_count, 1);
}

#[tokio::test]
async fn test_provider_failure_before_first_token_is_opaque_500() {
    let app = TestApp::with_model(MockModel::failing()).await;
    let (_, token) = app.user("a@example.com").await;

    let response = app
        .send(post_json("/chat", Some(&token), chat_body("chat-1", "Hello")))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = extract_text(response).await;
    assert!(!body.contains(PROVIDER_FAILURE_DETAIL));
    assert!(!body.contains("hunter2"));
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"], "Internal server error");
    assert_eq!(app.model.calls(), 1);

    assert!(db::get_chat(app.db(), "chat-1").await.is_err());
}

#[tokio::test]
async fn test_follow_up_keeps_history_order() {
    let app = TestApp::new().await;
    let (_, token) = app.user("a@example.com").await;

    let body = json!({
        "id": "chat-1",
        "messages": [
            { "id": "m1", "role": "user", "content": "One" },
            { "id": "m2", "role": "assistant", "content": "Two" },
            { "id": "m3", "role": "user", "content": "   " },
            { "id": "m4", "role": "user", "content": "Three" }
        ]
    });
    let response = app.send(post_json("/chat", Some(&token), body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    extract_text(response).await;

    let stored = db::get_chat(app.db(), "chat-1").await.unwrap().messages_vec().unwrap();
    let ids: Vec<&str> = stored.iter().take(3).map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m4"]);
    assert_eq!(stored.len(), 4);
}

#[tokio::test]
async fn test_unauthenticated_chat_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let (user_id, _) = app.user("a@example.com").await;

    let response = app
        .send(post_json("/chat", None, chat_body("chat-1", "Hello")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(post_json("/chat", Some("not-a-session"), chat_body("chat-1", "Hello")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let user = db::get_user(app.db(), &user_id).await.unwrap();
    assert_eq!(user.request_count, 0);
    assert!(db::get_chat(app.db(), "chat-1").await.is_err());
    assert_eq!(app.model.calls(), 0);
}

#[tokio::test]
async fn test_invalid_body_is_rejected_before_auth() {
    let app = TestApp::new().await;

    let response = app.send(post_raw("/chat", None, "{not json".to_string())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(post_json("/chat", None, json!({ "id": "x" }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(post_json("/chat", None, json!({ "id": "x", "messages": "hi" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(post_json("/chat", None, json!({ "messages": [] })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(extract_json(response).await["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_quota_exhausted_returns_429_without_calling_model() {
    let app = TestApp::new().await;
    let (user_id, token) = app.user("a@example.com").await;
    app.set_counter(&user_id, DAILY_REQUEST_LIMIT, TODAY).await;

    let response = app
        .send(post_json("/chat", Some(&token), chat_body("chat-1", "Hello")))
        .await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = extract_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("Upgrade to Pro"));
    assert_eq!(app.model.calls(), 0);
    assert!(db::get_chat(app.db(), "chat-1").await.is_err());
}

#[tokio::test]
async fn test_blank_history_is_rejected_after_admission() {
    let app = TestApp::new().await;
    let (_, token) = app.user("a@example.com").await;

    let response = app
        .send(post_json("/chat", Some(&token), chat_body("chat-1", "  \n ")))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.model.calls(), 0);
}

#[tokio::test]
async fn test_chat_owned_by_someone_else_is_not_overwritten() {
    let app = TestApp::new().await;
    let (_, alice) = app.user("alice@example.com").await;
    let (_, bob) = app.user("bob@example.com").await;

    let response = app
        .send(post_json("/chat", Some(&alice), chat_body("chat-1", "Mine")))
        .await;
    extract_text(response).await;

    let response = app
        .send(post_json("/chat", Some(&bob), chat_body("chat-1", "Hijack")))
        .await;
    extract_text(response).await;

    let stored = db::get_chat(app.db(), "chat-1").await.unwrap().messages_vec().unwrap();
    assert_eq!(stored[0].content.as_str(), "Mine");
}

#[tokio::test]
async fn test_get_chat_requires_id_and_existing_chat() {
    let app = TestApp::new().await;

    let response = app.send(get_request("/chat", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(get_request("/chat?id=unknown", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(extract_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_delete_chat_ownership() {
    let app = TestApp::new().await;
    let (_, alice) = app.user("alice@example.com").await;
    let (_, bob) = app.user("bob@example.com").await;

    let response = app
        .send(post_json("/chat", Some(&alice), chat_body("chat-1", "Hello")))
        .await;
    extract_text(response).await;

    let response = app.send(delete_request("/chat?id=chat-1", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.send(delete_request("/chat?id=chat-1", Some(&bob))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(db::get_chat(app.db(), "chat-1").await.is_ok());

    let response = app.send(delete_request("/chat", Some(&alice))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(delete_request("/chat?id=missing", Some(&alice))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.send(delete_request("/chat?id=chat-1", Some(&alice))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(db::get_chat(app.db(), "chat-1").await.is_err());
}

#[tokio::test]
async fn test_history_lists_only_own_chats() {
    let app = TestApp::new().await;
    let (_, alice) = app.user("alice@example.com").await;
    let (_, bob) = app.user("bob@example.com").await;

    for (token, id, text) in [(&alice, "a-1", "First"), (&bob, "b-1", "Other")] {
        let response = app
            .send(post_json("/chat", Some(token), chat_body(id, text)))
            .await;
        extract_text(response).await;
        app.clock.advance(chrono::Duration::seconds(1));
    }
    let response = app
        .send(post_json("/chat", Some(&alice), chat_body("a-2", "Second")))
        .await;
    extract_text(response).await;

    let response = app.send(get_request("/history", Some(&alice))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response).await;
    let chats = body.as_array().unwrap();
    assert_eq!(chats.len(), 2);
    assert_eq!(chats[0]["id"], "a-2");
    assert_eq!(chats[0]["title"], "Second");
    assert_eq!(chats[1]["id"], "a-1");

    let response = app.send(get_request("/history", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
