//! HTTP tests for /auth and /health.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{extract_json, get_request, patch_json, post_json, TestApp};
use serde_json::json;

fn session_cookie(response: &axum::http::Response<Body>) -> String {
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    set_cookie.split(';').next().unwrap().to_string()
}

fn with_cookie(uri: &str, method: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_register_me_logout_flow() {
    let app = TestApp::new().await;

    let response = app
        .send(post_json(
            "/auth/register",
            None,
            json!({ "email": " New@Example.com ", "password": "secret1" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = session_cookie(&response);
    assert!(cookie.starts_with("tama_session="));
    let body = extract_json(response).await;
    assert_eq!(body["email"], "new@example.com");
    assert_eq!(body["isPro"], false);
    assert!(body.get("password_hash").is_none());

    let response = app.send(with_cookie("/auth/me", "GET", &cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response).await;
    assert_eq!(body["email"], "new@example.com");
    assert_eq!(body["quota"]["used"], 0);
    assert_eq!(body["quota"]["limit"], 30);
    assert_eq!(body["quota"]["remaining"], 30);

    let response = app.send(with_cookie("/auth/logout", "POST", &cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.send(with_cookie("/auth/me", "GET", &cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login() {
    let app = TestApp::new().await;
    app.user("a@example.com").await;

    let response = app
        .send(post_json(
            "/auth/login",
            None,
            json!({ "email": "A@example.com", "password": "password1" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response);

    let response = app.send(with_cookie("/auth/me", "GET", &cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(post_json(
            "/auth/login",
            None,
            json!({ "email": "a@example.com", "password": "wrong-password" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(extract_json(response).await["code"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn test_register_validation() {
    let app = TestApp::new().await;
    app.user("taken@example.com").await;

    let response = app
        .send(post_json(
            "/auth/register",
            None,
            json!({ "email": "taken@example.com", "password": "secret1" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send(post_json(
            "/auth/register",
            None,
            json!({ "email": "short@example.com", "password": "123" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(post_json("/auth/register", None, json!({ "email": "x@example.com" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_profile_changes_password() {
    let app = TestApp::new().await;
    let (_, token) = app.user("a@example.com").await;

    let response = app
        .send(patch_json(
            "/auth/me",
            Some(&token),
            json!({ "password": "brand-new-pass", "currentPassword": "password1" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(app.state.auth.login("a@example.com", "brand-new-pass").await.is_ok());
    assert!(app.state.auth.login("a@example.com", "password1").await.is_err());

    let response = app
        .send(patch_json("/auth/me", None, json!({ "email": "b@example.com" })))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_change_needs_current_password() {
    let app = TestApp::new().await;
    let (_, token) = app.user("a@example.com").await;

    let response = app
        .send(patch_json("/auth/me", Some(&token), json!({ "password": "hijacked1" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(patch_json(
            "/auth/me",
            Some(&token),
            json!({ "password": "hijacked1", "currentPassword": "guess-guess" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(app.state.auth.login("a@example.com", "password1").await.is_ok());
    assert!(app.state.auth.login("a@example.com", "hijacked1").await.is_err());
}

#[tokio::test]
async fn test_password_change_signs_out_other_sessions() {
    let app = TestApp::new().await;
    let (user_id, token) = app.user("a@example.com").await;
    let other = app.state.auth.create_session(&user_id).await.unwrap();

    let response = app
        .send(patch_json(
            "/auth/me",
            Some(&token),
            json!({ "password": "brand-new-pass", "currentPassword": "password1" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.send(get_request("/auth/me", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.send(get_request("/auth/me", Some(&other.id))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bearer_logout_invalidates_session() {
    let app = TestApp::new().await;
    let (_, token) = app.user("a@example.com").await;

    let response = app
        .send(post_json("/auth/logout", Some(&token), json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.send(get_request("/auth/me", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_pro_user_quota_is_unlimited() {
    let app = TestApp::new().await;
    let (user_id, token) = app.user("pro@example.com").await;
    app.state.auth.set_pro(&user_id, true).await.unwrap();

    let response = app.send(get_request("/auth/me", Some(&token))).await;
    let body = extract_json(response).await;
    assert_eq!(body["isPro"], true);
    assert_eq!(body["quota"]["isPro"], true);
    assert!(body["quota"]["limit"].is_null());
}

#[tokio::test]
async fn test_expired_session_is_rejected() {
    let app = TestApp::new().await;
    let (_, token) = app.user("a@example.com").await;

    app.clock.advance(chrono::Duration::days(8));

    let response = app.send(get_request("/auth/me", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let response = app.send(get_request("/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], true);
}
