use mimalloc::MiMalloc;
use rcgateway::app::{AppState, build_vendor_client};
use rcgateway::config::{Config, Vendor};
use rcgateway::credentials::store;
use rcgateway::credentials::refresher;
use rcgateway::edge::edge_router;
use rcgateway::pipeline::PipelinePool;
use rcgateway::sink::TracingEventSink;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, signal};
use tracing::info;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::from_env();
    rcgateway::init_tracing(&cfg.basic.loglevel);

    let home = cfg
        .basic
        .credential_home
        .clone()
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .expect("neither basic.credential_home nor $HOME is set");

    let (default_quota_cooldown, default_capacity_cooldown) = AppState::cooldowns_from_config(&cfg);
    let pipeline_deadline = Duration::from_millis(cfg.basic.pipeline_max_wait_ms);

    let mut clients = HashMap::new();
    let mut credentials = HashMap::new();
    for vendor in Vendor::all() {
        let resolved = cfg.resolve(vendor);
        let client = build_vendor_client(resolved.proxy.as_deref(), resolved.enable_multiplexing);
        let handle = store::spawn(
            vendor,
            home.clone(),
            resolved,
            client.clone(),
            *rcgateway::model_catalog::MODEL_MASK_ALL,
        )
        .await;
        clients.insert(vendor, client);
        credentials.insert(vendor, handle);
    }

    refresher::spawn_sweep(credentials.values().cloned().collect(), Duration::from_secs(60));

    let pipeline_pool = Arc::new(PipelinePool::from_config(&cfg.routes));
    let gateway_key: Arc<str> = Arc::from(cfg.basic.gateway_key.clone());

    let state = Arc::new(AppState {
        gateway_key,
        clients,
        credentials,
        rate_limit: Arc::new(rcgateway::rate_limit::RateLimitState::default()),
        pipeline_pool,
        sink: Arc::new(TracingEventSink),
        pipeline_deadline,
        default_quota_cooldown,
        default_capacity_cooldown,
        config: cfg,
    });

    let app = edge_router(state.clone());

    let addr = SocketAddr::from((state.config.basic.listen_addr, state.config.basic.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("Server has shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { /* ... */ },
        _ = terminate => { /* ... */ },
    }
}
