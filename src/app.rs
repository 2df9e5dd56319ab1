//! Shared application state threaded through every edge-router handler.
//!
//! Generalizes the teacher's `PolluxState` (one hardcoded `reqwest::Client`
//! per vendor, a `Providers` bundle, and a raw API key) into the new
//! vendor-agnostic shape: a `Vendor`-keyed map of clients and credential
//! handles, plus the shared C2/C12/C15 state every pipeline run needs.

use crate::config::{Config, Vendor};
use crate::credentials::CredentialStoreHandle;
use crate::error::parse_duration;
use crate::pipeline::PipelinePool;
use crate::rate_limit::RateLimitState;
use crate::sink::EventSink;
use reqwest::header::{CONNECTION, HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const GATEWAY_USER_AGENT: &str = concat!("rcgateway/", env!("CARGO_PKG_VERSION"));

/// Builds a vendor's outbound `reqwest::Client`, mirroring the teacher's
/// `PolluxState::new::build_client` closure: disables HTTP/2 connection
/// multiplexing (and any idle pooling) when the vendor config asks for it,
/// otherwise enables adaptive-window HTTP/2.
pub fn build_vendor_client(proxy: Option<&str>, enable_multiplexing: bool) -> reqwest::Client {
    let mut headers = HeaderMap::new();

    let mut builder = reqwest::Client::builder()
        .user_agent(GATEWAY_USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(10 * 60));

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url).expect("invalid proxy url for reqwest client");
        builder = builder.proxy(proxy);
    }

    if enable_multiplexing {
        builder = builder.http2_adaptive_window(true);
    } else {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        builder = builder
            .http1_only()
            .pool_max_idle_per_host(0)
            .pool_idle_timeout(Duration::from_secs(0));
    }

    builder.default_headers(headers).build().expect("failed to build reqwest client")
}

/// Everything C10-C14 need, shared read-only (besides the interior-mutable
/// C2/C4 state) across every in-flight request.
pub struct AppState {
    pub config: Config,
    pub gateway_key: Arc<str>,
    pub clients: HashMap<Vendor, reqwest::Client>,
    pub credentials: HashMap<Vendor, CredentialStoreHandle>,
    pub rate_limit: Arc<RateLimitState>,
    pub pipeline_pool: Arc<PipelinePool>,
    pub sink: Arc<dyn EventSink>,
    pub pipeline_deadline: Duration,
    pub default_quota_cooldown: Duration,
    pub default_capacity_cooldown: Duration,
}

impl AppState {
    /// Resolves the fallback cooldowns from their config strings, panicking
    /// at boot (not per-request) if an operator typo makes one unparseable.
    pub fn cooldowns_from_config(config: &Config) -> (Duration, Duration) {
        let quota = parse_duration(&config.rate_limit.default_quota_cooldown)
            .unwrap_or_else(|| panic!(
                "rate_limit.default_quota_cooldown {:?} is not a valid duration",
                config.rate_limit.default_quota_cooldown
            ));
        let capacity = parse_duration(&config.rate_limit.capacity_cooldown)
            .unwrap_or_else(|| panic!(
                "rate_limit.capacity_cooldown {:?} is not a valid duration",
                config.rate_limit.capacity_cooldown
            ));
        (quota, capacity)
    }
}

pub type SharedState = Arc<AppState>;
