use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error as ThisError;

use super::IsRetryable;
use super::config::ConfigError;
use super::oauth::OauthError;
use super::provider::ProviderError;

/// Top-level error type for every request-path failure (§7.1).
#[derive(Debug, ThisError)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Upstream(#[from] ProviderError),

    #[error(transparent)]
    Oauth(#[from] OauthError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("not found")]
    NotFound,

    #[error("not implemented")]
    NotImplemented,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Upstream(ProviderError::from(e))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Validation(format!("failed to parse JSON: {e}"))
    }
}

impl IsRetryable for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Upstream(e) => e.is_retryable(),
            GatewayError::Oauth(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// `{error: {message, type, code, param: null, details}}` per §4.13.
#[derive(Serialize)]
pub struct ApiErrorObject {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}

/// A local filesystem/process permission failure is normalized to
/// `500 sandbox_denied` rather than a generic internal error (§4.13).
fn is_sandbox_denied(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("permission denied") || lower.contains("eacces") || lower.contains("operation not permitted")
}

/// Maps an HTTP status to the `type` string § 4.13 prescribes when no more
/// specific internal code applies.
fn error_type_for_status(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::REQUEST_TIMEOUT => "request_timeout",
        StatusCode::CONFLICT => "conflict",
        StatusCode::UNPROCESSABLE_ENTITY => "unprocessable_entity",
        StatusCode::TOO_MANY_REQUESTS => "rate_limit_exceeded",
        s if s.is_server_error() => "server_error",
        _ => "internal_error",
    }
}

/// Central `buildErrorPayload` (§4.13): maps any `GatewayError` to a
/// `(status, body)` pair. Call this instead of constructing `ApiErrorBody`
/// by hand so every route produces a standards-compliant error envelope.
pub fn build_error_payload(err: &GatewayError) -> (StatusCode, ApiErrorBody) {
    let (status, code, message, details): (StatusCode, Option<&str>, String, Option<Value>) =
        match err {
            GatewayError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, None, msg.clone(), None)
            }
            GatewayError::NotFound => (
                StatusCode::NOT_FOUND,
                None,
                "The requested resource was not found.".to_string(),
                None,
            ),
            GatewayError::NotImplemented => (
                StatusCode::NOT_IMPLEMENTED,
                Some("not_implemented"),
                "This endpoint is not implemented by this gateway.".to_string(),
                None,
            ),
            GatewayError::Internal(msg) if is_sandbox_denied(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("sandbox_denied"),
                msg.clone(),
                None,
            ),
            GatewayError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("internal_error"),
                msg.clone(),
                None,
            ),
            GatewayError::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("config_error"),
                e.to_string(),
                None,
            ),
            GatewayError::Oauth(OauthError::Flow {
                code,
                message,
                details,
            }) => (
                StatusCode::FORBIDDEN,
                Some(code.as_str()),
                message.clone(),
                details.clone(),
            ),
            GatewayError::Oauth(e) => (
                StatusCode::BAD_GATEWAY,
                Some("oauth_error"),
                e.to_string(),
                None,
            ),
            GatewayError::Upstream(p) => {
                let status = p.status.unwrap_or(StatusCode::BAD_GATEWAY);
                (status, p.code.as_deref(), p.message.clone(), p.details.clone())
            }
        };

    let error_type = code.unwrap_or_else(|| error_type_for_status(status)).to_string();

    (
        status,
        ApiErrorBody {
            inner: ApiErrorObject {
                message,
                error_type,
                code: code.map(str::to_string),
                param: None,
                details,
            },
        },
    )
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = build_error_payload(&self);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_internal_error_maps_to_sandbox_denied() {
        let err = GatewayError::Internal("open(\"/etc/shadow\"): Permission denied (os error 13)".to_string());
        let (status, body) = build_error_payload(&err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.inner.error_type, "sandbox_denied");
    }

    #[test]
    fn not_implemented_maps_to_501() {
        let (status, body) = build_error_payload(&GatewayError::NotImplemented);
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body.inner.error_type, "not_implemented");
    }

    #[test]
    fn upstream_rate_limit_preserves_429_and_type() {
        let provider = ProviderError {
            message: "rate limited".to_string(),
            status: Some(StatusCode::TOO_MANY_REQUESTS),
            code: Some("rate_limit_exceeded".to_string()),
            details: None,
            retryable: true,
            key_fingerprint: None,
            classification: None,
        };
        let (status, body) = build_error_payload(&GatewayError::Upstream(provider));
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body.inner.error_type, "rate_limit_exceeded");
    }
}
