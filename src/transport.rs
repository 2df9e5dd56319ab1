//! Provider Transport (C6): composes and dispatches the outbound HTTP call,
//! honoring timeouts/cancellation, classifying failures via C1, and emitting
//! usage events on success (§4.6).

use crate::error::{ProviderError, classify};
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct TransportRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
    pub api_key_for_fingerprint: Option<String>,
}

pub struct TransportResponse {
    pub body: serde_json::Value,
    pub status: u16,
    pub processing_time_ms: u64,
}

/// `sha256:<hex16>` fingerprint of an API key, safe to log/report (I4).
pub fn key_fingerprint(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("sha256:{hex}")
}

/// Dispatches `request` to its vendor, bounded by `deadline` and cancellable
/// via `cancellation`. On non-2xx, classifies the body through C1 and
/// returns a `ProviderError` carrying the key fingerprint instead of the key
/// itself.
pub async fn dispatch(
    client: &reqwest::Client,
    request: TransportRequest,
    deadline: Duration,
    cancellation: CancellationToken,
    default_quota_cooldown: Duration,
    default_capacity_cooldown: Duration,
) -> Result<TransportResponse, ProviderError> {
    let fingerprint = request.api_key_for_fingerprint.as_deref().map(key_fingerprint);
    let started = Instant::now();

    let send = client
        .post(&request.url)
        .headers(request.headers)
        .json(&request.body)
        .send();

    let response = tokio::select! {
        result = send => result?,
        _ = tokio::time::sleep(deadline) => {
            return Err(timeout_error(fingerprint));
        }
        _ = cancellation.cancelled() => {
            return Err(cancelled_error(fingerprint));
        }
    };

    let status = response.status();
    let processing_time_ms = started.elapsed().as_millis() as u64;

    if status.is_success() {
        let body: serde_json::Value = response.json().await?;
        return Ok(TransportResponse { body, status: status.as_u16(), processing_time_ms });
    }

    let body: Option<serde_json::Value> = response.json().await.ok();
    let message = body
        .as_ref()
        .and_then(|b| b.get("error").and_then(|e| e.get("message")).and_then(|m| m.as_str()))
        .unwrap_or("upstream request failed")
        .to_string();

    let info = classify(
        Some(status.as_u16()),
        body.as_ref(),
        &message,
        None,
        default_quota_cooldown,
        default_capacity_cooldown,
    );

    Err(ProviderError::from_classification(info, fingerprint))
}

fn timeout_error(fingerprint: Option<String>) -> ProviderError {
    let info = classify(
        Some(504),
        None,
        "pipeline deadline exceeded",
        Some("ETIMEDOUT"),
        Duration::from_secs(60),
        Duration::from_secs(30),
    );
    ProviderError::from_classification(info, fingerprint)
}

fn cancelled_error(fingerprint: Option<String>) -> ProviderError {
    let info = classify(
        Some(499),
        None,
        "request cancelled by client disconnect",
        None,
        Duration::from_secs(60),
        Duration::from_secs(30),
    );
    ProviderError::from_classification(info, fingerprint)
}

/// Dispatch URL for a chat-completions call. The spec's SDK-vs-raw-fetch
/// distinction for `api.openai.com` only matters to transports with a
/// vendor SDK; `reqwest` posts to the same resolved path either way.
pub fn resolve_dispatch_url(base_url: &str) -> String {
    format!("{base_url}/chat/completions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_fingerprint_never_contains_the_raw_key() {
        let fp = key_fingerprint("sk-super-secret-value");
        assert!(!fp.contains("sk-super-secret-value"));
        assert!(fp.starts_with("sha256:"));
        assert_eq!(fp.len(), "sha256:".len() + 16);
    }
}
