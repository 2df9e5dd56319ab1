use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use rcgateway::app::AppState;
use rcgateway::config::Config;
use rcgateway::edge::edge_router;
use rcgateway::rate_limit::RateLimitState;
use rcgateway::sink::TracingEventSink;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn state_with_key(gateway_key: &str) -> Arc<AppState> {
    let mut config = Config::default();
    config.basic.gateway_key = gateway_key.to_string();

    let (default_quota_cooldown, default_capacity_cooldown) = AppState::cooldowns_from_config(&config);

    Arc::new(AppState {
        gateway_key: Arc::from(gateway_key),
        clients: HashMap::new(),
        credentials: HashMap::new(),
        rate_limit: Arc::new(RateLimitState::default()),
        pipeline_pool: Arc::new(rcgateway::pipeline::PipelinePool::from_config(&config.routes)),
        sink: Arc::new(TracingEventSink),
        pipeline_deadline: Duration::from_secs(5),
        default_quota_cooldown,
        default_capacity_cooldown,
        config,
    })
}

#[tokio::test]
async fn chat_completions_without_key_is_rejected() {
    let state = state_with_key("secret123");
    let app = edge_router(state);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"model":"gpt-4o-mini","messages":[]}"#))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_completions_with_wrong_key_is_rejected() {
    let state = state_with_key("secret123");
    let app = edge_router(state);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .header("authorization", "Bearer not-the-right-key")
                .body(Body::from(r#"{"model":"gpt-4o-mini","messages":[]}"#))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_completions_with_valid_key_but_no_route_pool_returns_no_credential() {
    // No `routes.pools` entries configured, so C12 can't pick a candidate
    // and the request should surface 503 rather than panicking or hanging.
    let state = state_with_key("secret123");
    let app = edge_router(state);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .header("authorization", "Bearer secret123")
                .body(Body::from(r#"{"model":"gpt-4o-mini","messages":[{"role":"user","content":"hi"}]}"#))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = to_bytes(resp.into_body(), usize::MAX).await.expect("failed to read body");
    let parsed: serde_json::Value = serde_json::from_slice(&body).expect("response was not JSON");
    assert_eq!(parsed["error"]["code"], "no_credential");
}

#[tokio::test]
async fn healthz_bypasses_auth() {
    let state = state_with_key("secret123");
    let app = edge_router(state);

    let resp = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).expect("failed to build request"))
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_guard_disabled_when_gateway_key_is_empty() {
    let state = state_with_key("");
    let app = edge_router(state);

    // With no `gateway_key` configured the guard is disabled entirely, so an
    // unauthenticated request should reach the pipeline (and fail there with
    // 503, not 401, since no route pools are configured).
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"model":"gpt-4o-mini","messages":[{"role":"user","content":"hi"}]}"#))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unimplemented_surfaces_return_501() {
    let state = state_with_key("secret123");
    let app = edge_router(state);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/embeddings")
                .header("authorization", "Bearer secret123")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn list_models_requires_auth_and_returns_openai_shaped_list() {
    let state = state_with_key("secret123");
    let app = edge_router(state);

    let unauthed = app
        .clone()
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).expect("failed to build request"))
        .await
        .expect("request failed");
    assert_eq!(unauthed.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header("authorization", "Bearer secret123")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let body = to_bytes(resp.into_body(), usize::MAX).await.expect("failed to read body");
    let parsed: serde_json::Value = serde_json::from_slice(&body).expect("response was not JSON");
    assert_eq!(parsed["object"], "list");
}

#[tokio::test]
async fn request_id_header_is_reflected_and_generated_when_absent() {
    let state = state_with_key("secret123");
    let app = edge_router(state);

    let resp = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).expect("failed to build request"))
        .await
        .expect("request failed");

    let request_id = resp.headers().get("x-request-id").expect("x-request-id missing from response");
    assert!(!request_id.to_str().expect("non-utf8 header").is_empty());
}
