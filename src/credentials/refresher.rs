//! Background refresh scheduling (C4) and vendor-specific post-activation,
//! generalized from the teacher's per-vendor `workers/refresher.rs` actors.
//!
//! Two independent jobs live here:
//! 1. A periodic sweep that nudges every vendor's `CredentialStore` actor to
//!    check whether its managed credential is nearing expiry.
//! 2. Vendor post-activation steps a freshly-refreshed token needs before
//!    it is usable (iFlow's apiKey exchange, Qwen's resource-URL routing).

use crate::credentials::store::CredentialStoreHandle;
use crate::error::{IsRetryable, OauthError};
use backon::{ExponentialBuilder, Retryable};
use governor::{Quota, RateLimiter};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Retry policy for vendor post-activation calls: 3 attempts, {1s, 2s, 3s}
/// matching iFlow's user-info exchange backoff (§4.4).
fn post_activation_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
}

impl IsRetryable for reqwest::Error {
    fn is_retryable(&self) -> bool {
        self.is_timeout() || self.is_connect() || self.status().is_some_and(|s| s.is_server_error())
    }
}

/// Spawns a background task that pings every handle's `MaybeRefresh` check
/// on a fixed cadence, paced through a `governor` rate limiter so a large
/// vendor fleet doesn't all refresh in the same instant.
pub fn spawn_sweep(handles: Vec<CredentialStoreHandle>, interval: Duration) -> tokio::task::JoinHandle<()> {
    let quota = Quota::per_second(NonZeroU32::new(4).expect("4 is nonzero"));
    let limiter = Arc::new(RateLimiter::direct(quota));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for handle in &handles {
                limiter.until_ready().await;
                handle.notify_maybe_refresh();
            }
        }
    })
}

/// iFlow post-activation: exchange the freshly-minted access token for a
/// long-lived `apiKey` via the vendor's user-info endpoint, retried on
/// transient network failure.
pub async fn fetch_iflow_api_key(
    user_info_url: &str,
    access_token: &str,
    http_client: &reqwest::Client,
) -> Result<String, OauthError> {
    let body: Value = (|| async {
        http_client
            .get(user_info_url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    })
    .retry(post_activation_retry_policy())
    .when(IsRetryable::is_retryable)
    .notify(|err: &reqwest::Error, dur: Duration| {
        warn!("iFlow user-info exchange retrying after {:?}: {err}", dur);
    })
    .await
    .map_err(|e| OauthError::Other { message: format!("iFlow user-info exchange failed: {e}") })?;

    body.get("apiKey")
        .or_else(|| body.get("data").and_then(|d| d.get("apiKey")))
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
        .ok_or_else(|| OauthError::Parse {
            message: "iFlow user-info response has no apiKey field".to_string(),
            body: body.to_string(),
        })
}

/// Harvests the identity fields (`email`/`phone`) the iFlow user-info
/// response carries alongside `apiKey`, checked at both the top level and
/// under a nested `data` object (§4.4 step 5).
pub fn extract_iflow_identity(body: &Value) -> (Option<String>, Option<String>) {
    let field = |key: &str| {
        body.get(key)
            .or_else(|| body.get("data").and_then(|d| d.get(key)))
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
    };
    (field("email"), field("phone"))
}

/// Qwen post-activation: the token endpoint returns a `resource_url` field
/// alongside the standard OAuth payload, naming the regional API host this
/// credential must dispatch through instead of the default base URL.
pub fn extract_qwen_resource_url(raw_token_response: &Value) -> Option<String> {
    raw_token_response
        .get("resource_url")
        .or_else(|| raw_token_response.get("resourceUrl"))
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_qwen_resource_url_from_either_casing() {
        assert_eq!(
            extract_qwen_resource_url(&json!({"resource_url": "https://dashscope-intl.aliyuncs.com"})),
            Some("https://dashscope-intl.aliyuncs.com".to_string())
        );
        assert_eq!(
            extract_qwen_resource_url(&json!({"resourceUrl": "https://dashscope.aliyuncs.com"})),
            Some("https://dashscope.aliyuncs.com".to_string())
        );
        assert_eq!(extract_qwen_resource_url(&json!({})), None);
    }

    #[test]
    fn iflow_identity_falls_back_to_nested_data_object() {
        let (email, phone) = extract_iflow_identity(&json!({"data": {"email": "a@b.com", "phone": "+1"}}));
        assert_eq!(email.as_deref(), Some("a@b.com"));
        assert_eq!(phone.as_deref(), Some("+1"));
        assert_eq!(extract_iflow_identity(&json!({})), (None, None));
    }
}
