//! Pipeline Assembly (C10): the single execution path chaining C8
//! translation, C9 workflow coercion, C7 compatibility shaping, and C6
//! transport dispatch into one pipeline per `(providerKey, model)` (§4.10).
//!
//! A pipeline is stateless beyond the injected C4 credential handle and the
//! shared C2 rate-limit state; request and response pass through the same
//! four stages, symmetric in order (translate → shape → dispatch, then
//! parse → shape → coerce).

use crate::auth_header::{CredentialAuthView, IdentityHints, build_headers};
use crate::compat::{compact_messages, normalize_base_url, validate_tool_calls};
use crate::config::Vendor;
use crate::credentials::CredentialStoreHandle;
use crate::error::{GatewayError, ProviderError};
use crate::model_catalog::mask as model_mask_of;
use crate::rate_limit::{CooldownSource, ModelSeries, RateLimitState, SeriesCooldownDirective};
use crate::runtime::RuntimeMetadata;
use crate::sink::{ErrorEvent, EventSink, UsageEvent};
use crate::transport::{TransportRequest, dispatch, resolve_dispatch_url};
use crate::workflow::ProviderOutput;
use axum::http::StatusCode;
use gateway_schema::anthropic::{AnthropicMessageResponse, AnthropicRequest};
use gateway_schema::canonical::CanonicalRequest;
use gateway_schema::gemini::{GeminiGenerateContentRequest, GeminiResponseBody};
use gateway_schema::openai_chat::{OpenAiChatCompletion, OpenAiChatRequest};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything one pipeline run needs beyond the request body and runtime
/// metadata: the vendor's resolved HTTP client/base URL, its credential
/// handle, and the shared rate-limit/sink state (§4.10, §5).
pub struct PipelineInputs<'a> {
    pub vendor: Vendor,
    pub base_url: &'a str,
    pub client: &'a reqwest::Client,
    pub credentials: &'a CredentialStoreHandle,
    pub rate_limit: &'a RateLimitState,
    pub sink: &'a dyn EventSink,
    pub deadline: Duration,
    pub default_quota_cooldown: Duration,
    pub default_capacity_cooldown: Duration,
}

/// Wire endpoint path for each vendor's chat surface. Gemini bakes the model
/// into the path rather than the body, so it alone needs `model` here.
fn dispatch_url(vendor: Vendor, base_url: &str, model: &str) -> String {
    match vendor {
        Vendor::Gemini => format!("{base_url}/models/{model}:generateContent"),
        Vendor::Anthropic => format!("{base_url}/messages"),
        Vendor::OpenaiChat | Vendor::Iflow | Vendor::Qwen | Vendor::Glm => {
            resolve_dispatch_url(base_url)
        }
    }
}

fn build_wire_body(vendor: Vendor, request: CanonicalRequest) -> Result<serde_json::Value, GatewayError> {
    let value = match vendor {
        Vendor::Anthropic => serde_json::to_value(AnthropicRequest::from(request)),
        Vendor::Gemini => serde_json::to_value(GeminiGenerateContentRequest::from(request)),
        Vendor::OpenaiChat | Vendor::Iflow | Vendor::Qwen | Vendor::Glm => {
            serde_json::to_value(OpenAiChatRequest::from(request))
        }
    };
    value.map_err(GatewayError::from)
}

fn parse_wire_response(
    vendor: Vendor,
    body: serde_json::Value,
    model: &str,
) -> Option<gateway_schema::canonical::CanonicalResponse> {
    match vendor {
        Vendor::Anthropic => {
            let resp: AnthropicMessageResponse = serde_json::from_value(body).ok()?;
            Some(resp.to_canonical())
        }
        Vendor::Gemini => {
            let resp: GeminiResponseBody = serde_json::from_value(body).ok()?;
            gateway_schema::canonical::CanonicalResponse::from_gemini(resp, model.to_string())
        }
        Vendor::OpenaiChat | Vendor::Iflow | Vendor::Qwen | Vendor::Glm => {
            let resp: OpenAiChatCompletion = serde_json::from_value(body).ok()?;
            gateway_schema::canonical::CanonicalResponse::from_openai(resp)
        }
    }
}

/// Runs one request through the pipeline for `(inputs.vendor, meta.target_model)`.
///
/// Mirrors the teacher's per-vendor handler body (build client, dispatch,
/// branch on the result) but generalized: translation/shaping is vendor-
/// dispatched through small match arms instead of duplicated per vendor
/// module, and credential leasing/cooldown reporting live in one place for
/// every vendor family.
pub async fn run_pipeline(
    inputs: &PipelineInputs<'_>,
    meta: &RuntimeMetadata,
    mut request: CanonicalRequest,
    cancellation: CancellationToken,
) -> Result<ProviderOutput, GatewayError> {
    request.model = meta.target_model.clone();
    request.messages = compact_messages(request.messages);
    let tools = request.tools.clone();

    let model_mask = model_mask_of(&meta.target_model).unwrap_or(0);
    let lease = inputs
        .credentials
        .get_credential(model_mask)
        .await
        .ok_or_else(|| GatewayError::Upstream(ProviderError::no_available_credential()))?;
    let credential = &lease.credential;

    let auth_view = CredentialAuthView {
        access_token: &credential.access_token,
        api_key: credential.api_key.as_deref(),
        token_type: credential.token_type.as_deref(),
    };
    let identity = IdentityHints {
        request_id: &meta.request_id,
        route_name: &meta.route_name,
        session_id: meta.client.session_id.as_deref(),
        conversation_id: meta.client.conversation_id.as_deref(),
    };
    let headers = build_headers(inputs.vendor, &auth_view, &identity, meta.streaming);

    let base_url = normalize_base_url(inputs.base_url);
    let url = dispatch_url(inputs.vendor, &base_url, &meta.target_model);
    let body = build_wire_body(inputs.vendor, request.clone())?;

    let transport_request = TransportRequest {
        url,
        headers,
        body,
        api_key_for_fingerprint: credential.api_key.clone(),
    };

    let bucket_key = meta.rate_limit_bucket_key();

    let result = dispatch(
        inputs.client,
        transport_request,
        inputs.deadline,
        cancellation,
        inputs.default_quota_cooldown,
        inputs.default_capacity_cooldown,
    )
    .await;

    match result {
        Ok(response) => {
            inputs.rate_limit.reset(&bucket_key);

            let canonical = parse_wire_response(inputs.vendor, response.body, &meta.target_model)
                .ok_or_else(|| {
                    GatewayError::Upstream(ProviderError {
                        message: "upstream returned an unparseable response".to_string(),
                        status: Some(StatusCode::BAD_GATEWAY),
                        code: Some("invalid_upstream_response".to_string()),
                        details: None,
                        retryable: true,
                        key_fingerprint: None,
                        classification: None,
                    })
                })?;

            validate_tool_calls(&canonical.message, &tools)
                .map_err(|e| GatewayError::Validation(e.to_string()))?;

            inputs.sink.emit_usage(UsageEvent {
                request_id: meta.request_id.clone(),
                provider_key: meta.provider_key.clone(),
                model: meta.target_model.clone(),
                usage: canonical.usage.clone(),
                processing_time_ms: response.processing_time_ms,
            });

            Ok(ProviderOutput::Single(canonical))
        }
        Err(err) => {
            handle_failure(inputs, meta, &bucket_key, lease.id, model_mask, &err);
            inputs.sink.emit_error(ErrorEvent {
                request_id: meta.request_id.clone(),
                provider_key: meta.provider_key.clone(),
                message: err.message.clone(),
                status: err.status.map(|s| s.as_u16()),
                key_fingerprint: err.key_fingerprint.clone(),
            });
            Err(GatewayError::Upstream(err))
        }
    }
}

/// Reports a failed dispatch back to C4 (credential cooldown/invalidation)
/// and C2 (bucket escalation, and for the Gemini-CLI family a series-wide
/// cooldown directive C12 will honor across every candidate in the series).
fn handle_failure(
    inputs: &PipelineInputs<'_>,
    meta: &RuntimeMetadata,
    bucket_key: &str,
    credential_id: u64,
    model_mask: u64,
    err: &ProviderError,
) {
    let Some(info) = &err.classification else {
        return;
    };

    if err.status == Some(StatusCode::UNAUTHORIZED) || err.status == Some(StatusCode::FORBIDDEN) {
        inputs.credentials.report_invalid(credential_id);
        return;
    }

    if !info.is_rate_limit {
        return;
    }

    let cooldown = info.quota_delay.unwrap_or(inputs.default_quota_cooldown);
    let escalated = inputs.rate_limit.record_429(bucket_key) || info.affects_health;
    if escalated {
        inputs.rate_limit.force_escalate(bucket_key);
    }
    inputs.credentials.report_rate_limit(credential_id, model_mask, cooldown);

    if inputs.vendor.is_gemini_cli_family() {
        if let Some(series) = ModelSeries::from_model_name(&meta.target_model) {
            let source = if info.quota_delay.is_some() {
                CooldownSource::QuotaResetDelay
            } else {
                CooldownSource::QuotaExhaustedFallback
            };
            inputs.rate_limit.push_series_cooldown(SeriesCooldownDirective::new(
                inputs.vendor.as_str(),
                Some(meta.provider_key.clone()),
                Some(meta.target_model.clone()),
                series,
                cooldown,
                source,
            ));
        }
    }
}
