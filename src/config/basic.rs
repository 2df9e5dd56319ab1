use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr};

/// Core (non-vendor) server configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicConfig {
    /// HTTP server listen address. TOML: `basic.listen_addr`. Default: `0.0.0.0`.
    #[serde(default = "default_listen_ip")]
    pub listen_addr: IpAddr,

    /// HTTP server listen port. TOML: `basic.listen_port`. Default: `8788`.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Log level passed to `tracing_subscriber::EnvFilter` when `RUST_LOG` is unset.
    /// TOML: `basic.loglevel`. Default: `info`.
    #[serde(default = "default_loglevel")]
    pub loglevel: String,

    /// Directory credentials are persisted under, one subdirectory per providerId
    /// (`{credential_home}/.{providerId}/oauth_creds.json`). Defaults to `$HOME`.
    #[serde(default)]
    pub credential_home: Option<String>,

    /// Gateway API key required on every non-health route when non-empty.
    /// TOML: `basic.gateway_key`. Accepts a bare string or number for convenience.
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_string_lax")]
    pub gateway_key: String,

    /// Pipeline-wide deadline, `RCC_PIPELINE_MAX_WAIT_MS`. Default 300000.
    #[serde(default = "default_pipeline_max_wait_ms")]
    pub pipeline_max_wait_ms: u64,

    /// Whether client-supplied upstream `Authorization` is honored, `RCC_ALLOW_UPSTREAM_OVERRIDE`.
    #[serde(default)]
    pub allow_upstream_override: bool,

    #[serde(default = "default_sse_heartbeat_ms")]
    pub sse_heartbeat_ms: u64,

    #[serde(default = "default_sse_heartbeat_mode")]
    pub sse_heartbeat_mode: String,

    #[serde(default = "default_pre_sse_heartbeat_ms")]
    pub pre_sse_heartbeat_ms: u64,

    #[serde(default = "default_pre_sse_heartbeat_delay_ms")]
    pub pre_sse_heartbeat_delay_ms: u64,

    #[serde(default)]
    pub canonicalize_dotted_tool_names: bool,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_ip(),
            listen_port: default_listen_port(),
            loglevel: default_loglevel(),
            credential_home: None,
            gateway_key: String::new(),
            pipeline_max_wait_ms: default_pipeline_max_wait_ms(),
            allow_upstream_override: false,
            sse_heartbeat_ms: default_sse_heartbeat_ms(),
            sse_heartbeat_mode: default_sse_heartbeat_mode(),
            pre_sse_heartbeat_ms: default_pre_sse_heartbeat_ms(),
            pre_sse_heartbeat_delay_ms: default_pre_sse_heartbeat_delay_ms(),
            canonicalize_dotted_tool_names: false,
        }
    }
}

fn deserialize_string_lax<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(serde::de::Error::custom(
            "expected a string or a number for basic.gateway_key",
        )),
    }
}

fn default_listen_ip() -> IpAddr {
    Ipv4Addr::new(0, 0, 0, 0).into()
}
fn default_listen_port() -> u16 {
    8788
}
fn default_loglevel() -> String {
    "info".to_string()
}
fn default_pipeline_max_wait_ms() -> u64 {
    300_000
}
fn default_sse_heartbeat_ms() -> u64 {
    15_000
}
fn default_sse_heartbeat_mode() -> String {
    "comment".to_string()
}
fn default_pre_sse_heartbeat_ms() -> u64 {
    3_000
}
fn default_pre_sse_heartbeat_delay_ms() -> u64 {
    800
}
