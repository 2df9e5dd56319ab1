use axum::http::StatusCode;
use serde_json::Value;
use thiserror::Error as ThisError;

use super::IsRetryable;
use super::classifier::UpstreamErrorInfo;

/// An upstream vendor failure, carrying the C1 classification plus whatever
/// is needed to report and retry it (§7.1).
#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    pub status: Option<StatusCode>,
    pub code: Option<String>,
    pub details: Option<Value>,
    pub retryable: bool,
    pub key_fingerprint: Option<String>,
    pub classification: Option<UpstreamErrorInfo>,
}

impl ProviderError {
    pub fn from_classification(info: UpstreamErrorInfo, key_fingerprint: Option<String>) -> Self {
        let status =
            StatusCode::from_u16(info.status_code.unwrap_or(502)).unwrap_or(StatusCode::BAD_GATEWAY);
        let details = serde_json::json!({
            "upstream": {
                "code": info.upstream_code,
                "message": info.upstream_message,
            }
        });
        Self {
            message: info.message.clone(),
            status: Some(status),
            code: if info.is_rate_limit {
                Some("rate_limit_exceeded".to_string())
            } else {
                None
            },
            details: Some(details),
            retryable: info.is_recoverable,
            key_fingerprint,
            classification: Some(info),
        }
    }

    pub fn no_available_credential() -> Self {
        Self {
            message: "no available credential to process the request".to_string(),
            status: Some(StatusCode::SERVICE_UNAVAILABLE),
            code: Some("no_credential".to_string()),
            details: None,
            retryable: false,
            key_fingerprint: None,
            classification: None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        // Network-cause errors carry no upstream HTTP status (§4.13): a
        // timeout/connect failure maps to 504/502 respectively rather than
        // falling through to the generic 502 upstream default.
        let status = e
            .status()
            .map(|s| StatusCode::from_u16(s.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY))
            .or_else(|| e.is_timeout().then_some(StatusCode::GATEWAY_TIMEOUT))
            .or_else(|| e.is_connect().then_some(StatusCode::BAD_GATEWAY));
        Self {
            message: e.to_string(),
            status,
            code: None,
            details: None,
            retryable: status.is_none_or(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS),
            key_fingerprint: None,
            classification: None,
        }
    }
}

impl IsRetryable for ProviderError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}
