//! End-to-end dispatch through C11 (classify) -> C12 (pick) -> C10 (pipeline)
//! -> C6 (transport) against a real stub upstream, in the teacher's own
//! integration-test idiom (`tests/antigravity_oauth_exchange_tests.rs`): a
//! real `axum::serve` bound to an ephemeral port rather than a mocking crate.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::post,
};
use rcgateway::app::AppState;
use rcgateway::config::{
    BasicConfig, ClassifierRule, Config, PipelineEntry, ProvidersConfig, RateLimitDefaultsConfig,
    RoutesConfig, Vendor, VendorConfig, VendorResolvedConfig,
};
use rcgateway::credentials::store;
use rcgateway::edge::edge_router;
use rcgateway::rate_limit::RateLimitState;
use rcgateway::sink::{ErrorEvent, EventSink, UsageEvent};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tower::ServiceExt;

const STUB_MODEL: &str = "stub-model";
const GATEWAY_KEY: &str = "test-gateway-key";

/// Registers `STUB_MODEL` in the process-global model registry. Must run
/// before anything first touches `model_catalog::MODEL_REGISTRY`, since that
/// static is built once from the global `CONFIG` static and never rebuilt.
/// Every test in this file shares the one registration.
fn register_stub_model_globally() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX_EPOCH")
            .as_nanos();
        let mut path = std::env::temp_dir();
        path.push(format!("rcgateway-test-{}-{}.toml", std::process::id(), nanos));
        std::fs::write(&path, "[providers.openai_chat]\nmodel_list = [\"stub-model\"]\n")
            .expect("failed to write test rcc.toml");
        // SAFETY: runs once, before any test spawns a second thread that
        // reads the environment, and before `model_catalog::CONFIG` is
        // first dereferenced anywhere in this process.
        unsafe {
            std::env::set_var("RCC_CONFIG_PATH", &path);
        }
        assert_eq!(*rcgateway::model_catalog::MODEL_MASK_ALL, 1);
        assert_eq!(rcgateway::model_catalog::mask(STUB_MODEL), Some(1));
    });
}

#[derive(Clone, Default)]
struct CapturingSink {
    usage: Arc<Mutex<Vec<UsageEvent>>>,
    errors: Arc<Mutex<Vec<ErrorEvent>>>,
}

impl EventSink for CapturingSink {
    fn emit_usage(&self, event: UsageEvent) {
        self.usage.lock().expect("sink mutex poisoned").push(event);
    }
    fn emit_error(&self, event: ErrorEvent) {
        self.errors.lock().expect("sink mutex poisoned").push(event);
    }
}

#[derive(Clone, Default)]
struct StubUpstream {
    responses: Arc<Mutex<Vec<(StatusCode, Value)>>>,
    hits: Arc<AtomicUsize>,
}

async fn stub_chat_completions(State(stub): State<StubUpstream>) -> (StatusCode, Json<Value>) {
    stub.hits.fetch_add(1, Ordering::SeqCst);
    let mut responses = stub.responses.lock().expect("stub mutex poisoned");
    if responses.is_empty() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": {"message": "no canned response"}})));
    }
    let (status, body) = responses.remove(0);
    (status, Json(body))
}

/// Spawns a stub `/v1/chat/completions` upstream that returns each of
/// `responses` in order, then `500` for any further request past the end.
async fn spawn_stub_upstream(responses: Vec<(StatusCode, Value)>) -> (String, Arc<AtomicUsize>) {
    let stub = StubUpstream { responses: Arc::new(Mutex::new(responses)), hits: Arc::new(AtomicUsize::new(0)) };
    let hits = stub.hits.clone();
    let app = Router::new().route("/v1/chat/completions", post(stub_chat_completions)).with_state(stub);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub server run");
    });

    (format!("http://{addr}/v1"), hits)
}

/// Builds an `AppState` wired against a stub server at `base_url`, with a
/// single-candidate `default` route pool and a static-api-key credential
/// for `Vendor::OpenaiChat`.
async fn state_for_stub(base_url: &str, sink: CapturingSink) -> Arc<AppState> {
    register_stub_model_globally();

    let mut pools = BTreeMap::new();
    pools.insert(
        "default".to_string(),
        vec![PipelineEntry { provider_key: "openai_test".to_string(), model: STUB_MODEL.to_string() }],
    );

    let config = Config {
        basic: BasicConfig { gateway_key: GATEWAY_KEY.to_string(), ..BasicConfig::default() },
        providers: ProvidersConfig {
            openai_chat: VendorConfig {
                base_url: base_url.to_string(),
                model_list: vec![STUB_MODEL.to_string()],
                static_api_key: Some("sk-stub-test-key".to_string()),
                ..VendorConfig::default()
            },
            ..ProvidersConfig::default()
        },
        rate_limit: RateLimitDefaultsConfig {
            default_quota_cooldown: "5m".to_string(),
            capacity_cooldown: "1s".to_string(),
            oauth_lenient_state: false,
        },
        routes: RoutesConfig { rules: Vec::<ClassifierRule>::new(), pools },
    };

    let resolved = VendorResolvedConfig {
        base_url: base_url.to_string(),
        model_list: vec![STUB_MODEL.to_string()],
        static_api_key: Some("sk-stub-test-key".to_string()),
        oauth: None,
        proxy: None,
        retry_max_times: 2,
        enable_multiplexing: true,
    };
    let client = rcgateway::app::build_vendor_client(None, true);
    let credential_handle = store::spawn(
        Vendor::OpenaiChat,
        std::env::temp_dir(),
        resolved,
        client.clone(),
        *rcgateway::model_catalog::MODEL_MASK_ALL,
    )
    .await;

    let mut clients = HashMap::new();
    clients.insert(Vendor::OpenaiChat, client);
    let mut credentials = HashMap::new();
    credentials.insert(Vendor::OpenaiChat, credential_handle);

    let (default_quota_cooldown, default_capacity_cooldown) = AppState::cooldowns_from_config(&config);

    Arc::new(AppState {
        gateway_key: Arc::from(GATEWAY_KEY),
        clients,
        credentials,
        rate_limit: Arc::new(RateLimitState::default()),
        pipeline_pool: Arc::new(rcgateway::pipeline::PipelinePool::from_config(&config.routes)),
        sink: Arc::new(sink),
        pipeline_deadline: Duration::from_secs(5),
        default_quota_cooldown,
        default_capacity_cooldown,
        config,
    })
}

fn chat_request_body() -> Value {
    json!({
        "model": STUB_MODEL,
        "messages": [{"role": "user", "content": "hello"}],
        "stream": false,
    })
}

fn canned_success() -> Value {
    json!({
        "id": "chatcmpl-stub-1",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": STUB_MODEL,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "hi there"},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5},
    })
}

fn canned_429(retry_after_text: &str) -> Value {
    json!({"error": {"message": format!("rate limit exceeded, retry after {retry_after_text}")}})
}

async fn send_chat_request(app: axum::Router, body: &Value) -> axum::http::Response<axum::body::Body> {
    app.oneshot(
        axum::http::Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {GATEWAY_KEY}"))
            .body(axum::body::Body::from(body.to_string()))
            .expect("failed to build request"),
    )
    .await
    .expect("request failed")
}

/// S1: a single chat-completions request dispatched against a healthy stub
/// upstream resolves to 200 with the canonical completion shape and emits
/// exactly one `UsageEvent` carrying the upstream's usage numbers.
#[tokio::test]
async fn happy_path_dispatches_through_stub_upstream_and_emits_usage() {
    let (base_url, hits) = spawn_stub_upstream(vec![(StatusCode::OK, canned_success())]).await;
    let sink = CapturingSink::default();
    let state = state_for_stub(&base_url, sink.clone()).await;
    let app = edge_router(state);

    let resp = send_chat_request(app, &chat_request_body()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.expect("read body");
    let parsed: Value = serde_json::from_slice(&body).expect("response was not JSON");
    assert_eq!(parsed["object"], "chat.completion");
    assert_eq!(parsed["choices"][0]["message"]["content"], "hi there");

    let usage_events = sink.usage.lock().expect("sink mutex poisoned");
    assert_eq!(usage_events.len(), 1);
    assert_eq!(usage_events[0].usage.total_tokens, 5);
    assert_eq!(usage_events[0].provider_key, "openai_test");
}

/// S2: four consecutive 429s against the only candidate in the pool escalate
/// the bucket (I3's `ESCALATION_THRESHOLD = 4`), and every response along
/// the way surfaces the OpenAI-shaped `rate_limit_exceeded` envelope rather
/// than a generic 502.
#[tokio::test]
async fn four_consecutive_429s_escalate_the_bucket() {
    let canned = vec![
        (StatusCode::TOO_MANY_REQUESTS, canned_429("2s")),
        (StatusCode::TOO_MANY_REQUESTS, canned_429("2s")),
        (StatusCode::TOO_MANY_REQUESTS, canned_429("2s")),
        (StatusCode::TOO_MANY_REQUESTS, canned_429("2s")),
    ];
    let (base_url, hits) = spawn_stub_upstream(canned).await;
    let sink = CapturingSink::default();
    let state = state_for_stub(&base_url, sink.clone()).await;
    let rate_limit = state.rate_limit.clone();
    let app = edge_router(state);

    for attempt in 1..=4 {
        let resp = app.clone().oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {GATEWAY_KEY}"))
                .body(axum::body::Body::from(chat_request_body().to_string()))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS, "attempt {attempt}");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.expect("read body");
        let parsed: Value = serde_json::from_slice(&body).expect("response was not JSON");
        assert_eq!(parsed["error"]["type"], "rate_limit_exceeded", "attempt {attempt}");
    }

    assert_eq!(hits.load(Ordering::SeqCst), 4);
    assert!(rate_limit.is_escalated("openai_test"));

    let errors = sink.errors.lock().expect("sink mutex poisoned");
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(|e| e.status == Some(429)));
    assert!(errors.iter().all(|e| e.key_fingerprint.as_deref().is_some_and(|fp| fp.starts_with("sha256:"))));
}
