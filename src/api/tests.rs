#![allow(clippy::unwrap_used)]

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tower::ServiceExt;

use super::{app, handlers::AppState, handlers::IpRateLimit};
use crate::{
    identity::{password::Passwords, ports::EventPublisher, tests::test_signer, IdentityService},
    ratelimit::MemoryRateLimiter,
    store::MemoryCredentialStore,
};

#[derive(Default)]
struct Outbox {
    tokens: Mutex<Vec<String>>,
}

impl Outbox {
    fn last(&self) -> String {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
            .unwrap()
    }
}

#[async_trait]
impl EventPublisher for Outbox {
    async fn publish_user_registered(&self, _email: &str, token: &str) -> anyhow::Result<()> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token.to_string());
        Ok(())
    }

    async fn publish_verification_resent(&self, _email: &str, token: &str) -> anyhow::Result<()> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token.to_string());
        Ok(())
    }
}

fn test_app(ip_rate_limit: IpRateLimit) -> (Router, Arc<Outbox>) {
    let outbox = Arc::new(Outbox::default());
    let limiter = Arc::new(MemoryRateLimiter::new());
    let identity = IdentityService::builder(Arc::new(MemoryCredentialStore::new()), test_signer())
        .event_publisher(outbox.clone())
        .rate_limiter(limiter.clone())
        .passwords(Passwords::with_params(64, 1, 1).unwrap())
        .build();
    let state = AppState::new(Arc::new(identity), limiter, ip_rate_limit);
    (app(Arc::new(state)), outbox)
}

fn generous() -> IpRateLimit {
    IpRateLimit {
        limit: 1_000,
        window: Duration::from_secs(60),
    }
}

fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "api-test/1.0")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn bearer_request(method: Method, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn register(app: &Router, email: &str) -> StatusCode {
    send(
        app,
        json_request(
            Method::POST,
            "/v1/register",
            &json!({"email": email, "password": "pw12345678"}),
        ),
    )
    .await
    .0
}

async fn verify(app: &Router, token: &str) -> StatusCode {
    let request = Request::builder()
        .uri(format!("/v1/register/verify?token={token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await.0
}

async fn login(app: &Router, email: &str) -> (StatusCode, Value) {
    let (status, body) = send(
        app,
        json_request(
            Method::POST,
            "/v1/login",
            &json!({"email": email, "password": "pw12345678", "device": "phone"}),
        ),
    )
    .await;
    (
        status,
        serde_json::from_slice(&body).unwrap_or(Value::Null),
    )
}

#[tokio::test]
async fn health_reports_build() -> Result<()> {
    let (app, _) = test_app(generous());
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let health: Value = serde_json::from_slice(&body)?;
    assert_eq!(health["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[tokio::test]
async fn request_id_is_propagated() -> Result<()> {
    let (app, _) = test_app(generous());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(
        response.headers().get("x-request-id").map(|v| v.as_bytes()),
        Some(&b"req-123"[..])
    );
    Ok(())
}

#[tokio::test]
async fn register_maps_outcomes() {
    let (app, _) = test_app(generous());

    assert_eq!(register(&app, "new@example.com").await, StatusCode::CREATED);
    assert_eq!(register(&app, "NEW@example.com").await, StatusCode::CONFLICT);
    assert_eq!(register(&app, "nope").await, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/v1/register",
            &json!({"email": "short@example.com", "password": "short"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Request::builder()
            .method(Method::POST)
            .uri("/v1/register")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verify_maps_token_states() {
    let (app, outbox) = test_app(generous());
    register(&app, "verify@example.com").await;
    let token = outbox.last();

    let (status, _) = send(
        &app,
        Request::builder()
            .uri("/v1/register/verify")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(verify(&app, "unknown").await, StatusCode::NOT_FOUND);
    assert_eq!(verify(&app, &token).await, StatusCode::OK);
    assert_eq!(verify(&app, &token).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn resend_is_throttled_by_cooldown() {
    let (app, _) = test_app(generous());
    register(&app, "again@example.com").await;

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/v1/register/resend",
            &json!({"email": "again@example.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/v1/register/resend",
            &json!({"email": "ghost@example.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_lifecycle() {
    let (app, outbox) = test_app(generous());
    register(&app, "session@example.com").await;

    let (status, _) = login(&app, "session@example.com").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    verify(&app, &outbox.last()).await;
    let (status, body) = login(&app, "session@example.com").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    let access = body["access_token"].as_str().unwrap().to_string();
    let refresh = body["refresh_token"].as_str().unwrap().to_string();
    assert!(body["refresh_expires_at"].as_i64() > body["access_expires_at"].as_i64());

    let (status, _) = send(&app, bearer_request(Method::POST, "/v1/logout", &refresh)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Request::builder()
            .method(Method::POST)
            .uri("/v1/logout")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, bearer_request(Method::POST, "/v1/logout", &access)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, bearer_request(Method::POST, "/v1/logout", &access)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A logged-out token cannot delete the account.
    let (status, _) = send(&app, bearer_request(Method::DELETE, "/v1/account", &access)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = login(&app, "session@example.com").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn delete_account_ends_access() {
    let (app, outbox) = test_app(generous());
    register(&app, "gone@example.com").await;
    verify(&app, &outbox.last()).await;

    let (_, body) = login(&app, "gone@example.com").await;
    let access = body["access_token"].as_str().unwrap().to_string();

    let (status, _) = send(&app, bearer_request(Method::DELETE, "/v1/account", &access)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = login(&app, "gone@example.com").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, bearer_request(Method::DELETE, "/v1/account", &access)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn v1_routes_are_limited_per_ip() {
    let (app, _) = test_app(IpRateLimit {
        limit: 2,
        window: Duration::from_secs(60),
    });

    let from = |ip: &str| {
        Request::builder()
            .uri("/v1/register/verify?token=x")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(send(&app, from("198.51.100.1")).await.0, StatusCode::NOT_FOUND);
    assert_eq!(send(&app, from("198.51.100.1")).await.0, StatusCode::NOT_FOUND);
    assert_eq!(
        send(&app, from("198.51.100.1")).await.0,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(send(&app, from("198.51.100.2")).await.0, StatusCode::NOT_FOUND);

    // Health is not throttled.
    for _ in 0..3 {
        let (status, _) = send(
            &app,
            Request::builder()
                .uri("/health")
                .header("x-forwarded-for", "198.51.100.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let (app, _) = test_app(generous());
    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api-docs/openapi.json")
            .body(Body::empty())?,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let doc: Value = serde_json::from_slice(&body)?;
    assert!(doc["paths"]["/v1/login"].is_object());
    Ok(())
}
