//! Edge Router (C13): HTTP surface assembly, request-id plumbing, and the
//! access-log middleware carried from the teacher's `server/router.rs`
//! (§4.13, §6).

pub mod guard;
pub mod handlers;

use crate::app::SharedState;
use axum::{
    Router,
    extract::Request,
    http::{HeaderName, HeaderValue, StatusCode, Version, header::USER_AGENT},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use base64::Engine as _;
use rand::RngCore;
use std::time::Instant;
use tracing::{error, info, warn};

const MAX_REQUEST_ID_LEN: usize = 128;
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const X_WORKER_PID: HeaderName = HeaderName::from_static("x-worker-pid");

/// The request id threaded from `access_log` into every handler via
/// `Extension`, so C13/C14's emitted events and the access log agree.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

fn generate_request_id() -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn format_http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/?",
    }
}

async fn access_log(mut req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    let request_id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let mut resp = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }
    if let Ok(pid) = HeaderValue::from_str(&std::process::id().to_string()) {
        resp.headers_mut().insert(X_WORKER_PID.clone(), pid);
    }

    let status = resp.status();
    let latency_ms = start.elapsed().as_millis() as u64;
    let path = uri.path();
    let protocol = format_http_version(version);

    if status.is_server_error() {
        error!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(), request_id, method.as_str(), protocol, path, latency_ms, user_agent
        );
    } else if status.is_client_error() {
        warn!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(), request_id, method.as_str(), protocol, path, latency_ms, user_agent
        );
    } else {
        info!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(), request_id, method.as_str(), protocol, path, latency_ms, user_agent
        );
    }

    resp
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// Assembles the full edge router: the core OpenAI/Anthropic surfaces plus
/// the 501-stub OpenAI surfaces, wrapped in the access-log middleware.
/// `RequireKeyAuth` is evaluated per-handler (it extracts from `SharedState`
/// directly) rather than as a separate layer, since the guard needs
/// `basic.gateway_key` from state.
pub fn edge_router(state: SharedState) -> Router {
    let not_implemented_surfaces = Router::new()
        .route("/v1/embeddings", post(handlers::not_implemented))
        .route("/v1/moderations", post(handlers::not_implemented))
        .route("/v1/images/generations", post(handlers::not_implemented))
        .route("/v1/audio/transcriptions", post(handlers::not_implemented))
        .route("/v1/audio/translations", post(handlers::not_implemented))
        .route("/v1/audio/speech", post(handlers::not_implemented))
        .route("/v1/files", post(handlers::not_implemented))
        .route("/v1/files/{id}", get(handlers::not_implemented))
        .route("/v1/fine_tuning/jobs", post(handlers::not_implemented))
        .route("/v1/batches", post(handlers::not_implemented))
        .route("/v1/assistants", post(handlers::not_implemented));

    Router::new()
        .route("/healthz", get(health))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/completions", post(handlers::legacy_completions))
        .route("/v1/messages", post(handlers::anthropic_messages))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/models/{model}", get(handlers::get_model))
        .merge(not_implemented_surfaces)
        .with_state(state)
        .layer(middleware::from_fn(access_log))
}
