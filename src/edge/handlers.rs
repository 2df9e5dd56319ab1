//! Edge Router handlers (C13): the concrete HTTP surface, each handler
//! running request → C11 classify → C12 pick → C10 pipeline → C9 coerce →
//! C14 emit in that order (§4.13, §6).

use crate::app::SharedState;
use crate::config::Vendor;
use crate::edge::RequestId;
use crate::edge::guard::RequireKeyAuth;
use crate::error::{GatewayError, ProviderError};
use crate::model_catalog;
use crate::pipeline::assembly::{PipelineInputs, run_pipeline};
use crate::pipeline::classifier;
use crate::runtime::{ClientProtocol, RuntimeMetadata};
use crate::sse::{self, HeartbeatMode, SseTiming};
use crate::workflow::{self, ProviderOutput, WorkflowOutput};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::CACHE_CONTROL},
    response::{IntoResponse, Response, Sse},
};
use gateway_schema::anthropic::{AnthropicMessageResponse, AnthropicRequest};
use gateway_schema::canonical::{CanonicalMessage, CanonicalRequest, CanonicalRole};
use gateway_schema::openai::{OpenaiModel, OpenaiModelList};
use gateway_schema::openai_chat::{OpenAiChatCompletion, OpenAiChatRequest};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const X_RC_PROVIDER: &str = "x-rc-provider";

fn vendor_pin(headers: &HeaderMap) -> Option<String> {
    headers.get(X_RC_PROVIDER).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn no_store_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers
}

fn sse_extra_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
    headers
}

fn timing_from_basic(basic: &crate::config::BasicConfig) -> SseTiming {
    SseTiming {
        heartbeat_ms: basic.sse_heartbeat_ms,
        pre_heartbeat_delay_ms: basic.pre_sse_heartbeat_delay_ms,
        pre_heartbeat_interval_ms: basic.pre_sse_heartbeat_ms,
    }
}

fn heartbeat_mode(basic: &crate::config::BasicConfig) -> HeartbeatMode {
    sse::parse_heartbeat_mode(&basic.sse_heartbeat_mode)
}

/// Runs a canonical request through C11/C12/C10, returning the runtime
/// metadata alongside whatever the pipeline produced (§4.13 step 1-2).
async fn dispatch_canonical(
    state: &SharedState,
    request: CanonicalRequest,
    request_id: String,
    endpoint: &str,
    protocol: ClientProtocol,
    pin: Option<&str>,
) -> Result<(RuntimeMetadata, ProviderOutput), GatewayError> {
    let route_name = classifier::classify(&request, endpoint, protocol, &state.config.routes.rules);

    let pick = state
        .pipeline_pool
        .pick(&route_name, &state.rate_limit, pin)
        .ok_or_else(|| GatewayError::Upstream(ProviderError::no_available_credential()))?;

    let vendor = Vendor::from_provider_key(&pick.provider_key)
        .ok_or_else(|| GatewayError::Internal(format!("unresolvable provider_key {}", pick.provider_key)))?;

    let client = state
        .clients
        .get(&vendor)
        .ok_or_else(|| GatewayError::Internal(format!("no client configured for vendor {}", vendor.as_str())))?;
    let credentials = state
        .credentials
        .get(&vendor)
        .ok_or_else(|| GatewayError::Internal(format!("no credential store for vendor {}", vendor.as_str())))?;

    let resolved = state.config.resolve(vendor);
    let meta = RuntimeMetadata::new(
        request_id,
        vendor,
        pick.provider_key,
        route_name,
        pick.model,
        request.stream,
        protocol,
    );

    let inputs = PipelineInputs {
        vendor,
        base_url: &resolved.base_url,
        client,
        credentials,
        rate_limit: &state.rate_limit,
        sink: state.sink.as_ref(),
        deadline: state.pipeline_deadline,
        default_quota_cooldown: state.default_quota_cooldown,
        default_capacity_cooldown: state.default_capacity_cooldown,
    };

    let output = run_pipeline(&inputs, &meta, request, CancellationToken::new()).await?;
    Ok((meta, output))
}

/// `POST /v1/chat/completions` — OpenAI chat, streaming or not (§6).
pub async fn chat_completions(
    State(state): State<SharedState>,
    _auth: RequireKeyAuth,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(req): Json<OpenAiChatRequest>,
) -> Result<Response, GatewayError> {
    let wants_stream = req.stream;
    let model = req.model.clone();
    let request: CanonicalRequest = req.into();
    let pin = vendor_pin(&headers);

    let (meta, output) = dispatch_canonical(
        &state,
        request,
        request_id.0,
        "/v1/chat/completions",
        ClientProtocol::OpenaiChat,
        pin.as_deref(),
    )
    .await?;

    let coerced = workflow::coerce(output, wants_stream).await.map_err(GatewayError::Upstream)?;

    match coerced {
        WorkflowOutput::Single(response) => {
            let completion = OpenAiChatCompletion::from_canonical(
                format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
                chrono::Utc::now().timestamp(),
                response,
            );
            Ok((StatusCode::OK, no_store_headers(), Json(completion)).into_response())
        }
        WorkflowOutput::Stream(deltas) => {
            let timing = timing_from_basic(&state.config.basic);
            let mode = heartbeat_mode(&state.config.basic);
            let stream = sse::openai_chunk_sse(
                format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
                model,
                chrono::Utc::now().timestamp(),
                deltas,
                timing,
                mode,
            );
            let sse_response = Sse::new(stream).into_response();
            Ok((sse_extra_headers(), sse_response).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LegacyCompletionRequest {
    pub model: String,
    #[serde(default)]
    pub prompt: Value,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<Value>,
}

fn prompt_to_text(prompt: &Value) -> String {
    match prompt {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// `POST /v1/completions` — legacy completions, never streamed (§6).
pub async fn legacy_completions(
    State(state): State<SharedState>,
    _auth: RequireKeyAuth,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(req): Json<LegacyCompletionRequest>,
) -> Result<Response, GatewayError> {
    let pin = vendor_pin(&headers);
    let stop = match req.stop {
        Some(Value::String(s)) => vec![s],
        Some(Value::Array(a)) => a.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    };

    let request = CanonicalRequest {
        model: req.model,
        system: None,
        messages: vec![CanonicalMessage::text(CanonicalRole::User, prompt_to_text(&req.prompt))],
        tools: Vec::new(),
        tool_choice: None,
        stream: false,
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: req.max_tokens,
        stop,
        extra: Default::default(),
    };

    let (_meta, output) = dispatch_canonical(
        &state,
        request,
        request_id.0,
        "/v1/completions",
        ClientProtocol::OpenaiChat,
        pin.as_deref(),
    )
    .await?;

    let ProviderOutput::Single(response) = output else {
        return Err(GatewayError::Internal(
            "legacy completions pipeline unexpectedly produced a stream".to_string(),
        ));
    };

    let completion = OpenAiChatCompletion::from_canonical(
        format!("cmpl-{}", uuid::Uuid::new_v4().simple()),
        chrono::Utc::now().timestamp(),
        response,
    );
    Ok((StatusCode::OK, no_store_headers(), Json(completion)).into_response())
}

/// `POST /v1/messages` — Anthropic messages, streaming or not (§6).
pub async fn anthropic_messages(
    State(state): State<SharedState>,
    _auth: RequireKeyAuth,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(req): Json<AnthropicRequest>,
) -> Result<Response, GatewayError> {
    let wants_stream = req.stream;
    let model = req.model.clone();
    let request: CanonicalRequest = req.into();
    let pin = vendor_pin(&headers);

    let (_meta, output) = dispatch_canonical(
        &state,
        request,
        request_id.0,
        "/v1/messages",
        ClientProtocol::Anthropic,
        pin.as_deref(),
    )
    .await?;

    let coerced = workflow::coerce(output, wants_stream).await.map_err(GatewayError::Upstream)?;

    match coerced {
        WorkflowOutput::Single(response) if !wants_stream => {
            let message = AnthropicMessageResponse::from_canonical(response);
            Ok((StatusCode::OK, no_store_headers(), Json(message)).into_response())
        }
        other => {
            let stream = sse::anthropic_message_sse(model, other, state.config.basic.sse_heartbeat_ms);
            let sse_response = Sse::new(stream).into_response();
            Ok((sse_extra_headers(), sse_response).into_response())
        }
    }
}

/// `GET /v1/models` — configured models across every vendor family (§6).
pub async fn list_models(State(_state): State<SharedState>, _auth: RequireKeyAuth) -> Response {
    let names = model_catalog::model_names_from_mask(*model_catalog::MODEL_MASK_ALL);
    let list = OpenaiModelList::from_model_names(names, "rcgateway".to_string());
    (no_store_headers(), Json(list)).into_response()
}

/// `GET /v1/models/:model` — 501 if the model isn't in the merged registry (§6).
pub async fn get_model(
    State(_state): State<SharedState>,
    _auth: RequireKeyAuth,
    Path(model): Path<String>,
) -> Result<Response, GatewayError> {
    if model_catalog::mask(&model).is_none() {
        return Err(GatewayError::NotImplemented);
    }
    let entry = OpenaiModel {
        id: model.clone(),
        display_name: model,
        owned_by: "rcgateway".to_string(),
        ..Default::default()
    };
    Ok((no_store_headers(), Json(entry)).into_response())
}

/// Shared stub for every OpenAI surface this gateway doesn't implement (§6).
pub async fn not_implemented() -> GatewayError {
    GatewayError::NotImplemented
}
