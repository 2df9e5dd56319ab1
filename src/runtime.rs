//! Runtime Metadata (C3): the envelope threaded alongside a request's
//! canonical payload through every pipeline stage.
//!
//! Unlike the source's side-field-on-the-payload trick (metadata attached to
//! a conventionally named property of the request object, stripped before
//! the payload reaches the vendor), Rust's ownership model makes that
//! unnecessary: `RuntimeMetadata` is simply a sibling value passed next to
//! `CanonicalRequest` through every stage's function signature. It is never
//! embedded in the JSON serialized to the upstream.

use crate::config::Vendor;
use axum::http::HeaderMap;
use std::sync::Arc;

/// Client-supplied context worth preserving across translations, mostly for
/// debug-sample capture and upstream session continuity headers.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub client_request_id: Option<String>,
    /// Raw client headers, kept for vendors that need to mirror a subset
    /// (e.g. `user-agent`) onto the upstream call.
    pub client_headers: Option<Arc<HeaderMap>>,
}

/// The wire protocol the client spoke on this request's HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProtocol {
    OpenaiChat,
    Anthropic,
}

/// Carrier object attached by C13 when a request enters the pipeline,
/// preserved unmodified through C8/C9/C7/C6 and consumed again by C13/C14
/// when the response is emitted (§4.3).
#[derive(Debug, Clone)]
pub struct RuntimeMetadata {
    pub request_id: String,
    pub vendor: Vendor,
    pub provider_key: String,
    pub route_name: String,
    pub target_model: String,
    pub streaming: bool,
    pub client_protocol: ClientProtocol,
    pub client: ClientContext,
}

impl RuntimeMetadata {
    pub fn new(
        request_id: String,
        vendor: Vendor,
        provider_key: String,
        route_name: String,
        target_model: String,
        streaming: bool,
        client_protocol: ClientProtocol,
    ) -> Self {
        Self {
            request_id,
            vendor,
            provider_key,
            route_name,
            target_model,
            streaming,
            client_protocol,
            client: ClientContext::default(),
        }
    }

    /// The Gemini-CLI-family rate-limit bucket key includes the target model
    /// (§4.2); every other vendor buckets by `providerKey` alone.
    pub fn rate_limit_bucket_key(&self) -> String {
        if self.vendor.is_gemini_cli_family() {
            format!("{}::{}", self.provider_key, self.target_model)
        } else {
            self.provider_key.clone()
        }
    }
}
