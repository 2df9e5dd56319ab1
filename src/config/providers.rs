use serde::{Deserialize, Serialize};

/// Shared fallbacks every vendor config resolves missing fields against,
/// mirroring the teacher's `ProviderDefaults` + `.resolve(&defaults)` split.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderDefaults {
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_retry_max_times")]
    pub retry_max_times: u32,
    #[serde(default = "default_true")]
    pub enable_multiplexing: bool,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            proxy: None,
            retry_max_times: default_retry_max_times(),
            enable_multiplexing: true,
        }
    }
}

fn default_retry_max_times() -> u32 {
    2
}
fn default_true() -> bool {
    true
}

/// OAuth client parameters for a vendor that authenticates via device-code or
/// authorization-code + PKCE (§4.4). Absent for vendors that use a plain
/// static API key.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct VendorOauthConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    #[serde(default)]
    pub device_auth_url: Option<String>,
    #[serde(default)]
    pub user_info_url: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub redirect_port: Option<u16>,
}

/// One vendor family's declared config, before defaults are resolved.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct VendorConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model_list: Vec<String>,
    #[serde(default)]
    pub static_api_key: Option<String>,
    #[serde(default)]
    pub oauth: Option<VendorOauthConfig>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub retry_max_times: Option<u32>,
    #[serde(default)]
    pub enable_multiplexing: Option<bool>,
}

/// `VendorConfig` with every `Option` resolved against `ProviderDefaults`.
#[derive(Debug, Clone)]
pub struct VendorResolvedConfig {
    pub base_url: String,
    pub model_list: Vec<String>,
    pub static_api_key: Option<String>,
    pub oauth: Option<VendorOauthConfig>,
    pub proxy: Option<String>,
    pub retry_max_times: u32,
    pub enable_multiplexing: bool,
}

impl VendorConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> VendorResolvedConfig {
        VendorResolvedConfig {
            base_url: self.base_url.clone(),
            model_list: self.model_list.clone(),
            static_api_key: self.static_api_key.clone(),
            oauth: self.oauth.clone(),
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
        }
    }
}

/// The six vendor families in scope (§1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    OpenaiChat,
    Anthropic,
    Gemini,
    Iflow,
    Qwen,
    Glm,
}

impl Vendor {
    pub fn as_str(self) -> &'static str {
        match self {
            Vendor::OpenaiChat => "openai_chat",
            Vendor::Anthropic => "anthropic",
            Vendor::Gemini => "gemini",
            Vendor::Iflow => "iflow",
            Vendor::Qwen => "qwen",
            Vendor::Glm => "glm",
        }
    }

    pub fn all() -> [Vendor; 6] {
        [
            Vendor::OpenaiChat,
            Vendor::Anthropic,
            Vendor::Gemini,
            Vendor::Iflow,
            Vendor::Qwen,
            Vendor::Glm,
        ]
    }

    /// Gemini-CLI family bucket keying per §4.2: `providerId` ∈
    /// {antigravity, gemini-cli} or dotted variants. In this gateway the
    /// Gemini vendor is the one family that routes through the Gemini-CLI
    /// OAuth surface, so it alone uses the `providerKey::model` bucket key.
    pub fn is_gemini_cli_family(self) -> bool {
        matches!(self, Vendor::Gemini)
    }

    /// The short, underscore-free vendor segment routes/pools key on —
    /// distinct from `as_str()` (which names the `rcc.toml` table and can
    /// itself contain an underscore, e.g. `openai_chat`). `PipelineEntry`'s
    /// `provider_key` is conventionally `{short_key}` or
    /// `{short_key}_{discriminator}`, so C12's "segment before the first
    /// `_`" vendor-pin match always lines up with this value.
    pub fn short_key(self) -> &'static str {
        match self {
            Vendor::OpenaiChat => "openai",
            Vendor::Anthropic => "anthropic",
            Vendor::Gemini => "gemini",
            Vendor::Iflow => "iflow",
            Vendor::Qwen => "qwen",
            Vendor::Glm => "glm",
        }
    }

    pub fn from_short_key(key: &str) -> Option<Vendor> {
        Vendor::all().into_iter().find(|v| v.short_key() == key)
    }

    /// Resolves a `PipelineEntry.provider_key` (e.g. `openai_primary`) back
    /// to the vendor family it belongs to.
    pub fn from_provider_key(provider_key: &str) -> Option<Vendor> {
        let prefix = provider_key.split('_').next().unwrap_or(provider_key);
        Vendor::from_short_key(prefix)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub defaults: ProviderDefaults,
    #[serde(default)]
    pub openai_chat: VendorConfig,
    #[serde(default)]
    pub anthropic: VendorConfig,
    #[serde(default)]
    pub gemini: VendorConfig,
    #[serde(default)]
    pub iflow: VendorConfig,
    #[serde(default)]
    pub qwen: VendorConfig,
    #[serde(default)]
    pub glm: VendorConfig,
}

impl ProvidersConfig {
    pub fn vendor_config(&self, vendor: Vendor) -> &VendorConfig {
        match vendor {
            Vendor::OpenaiChat => &self.openai_chat,
            Vendor::Anthropic => &self.anthropic,
            Vendor::Gemini => &self.gemini,
            Vendor::Iflow => &self.iflow,
            Vendor::Qwen => &self.qwen,
            Vendor::Glm => &self.glm,
        }
    }

    pub fn resolve(&self, vendor: Vendor) -> VendorResolvedConfig {
        self.vendor_config(vendor).resolve(&self.defaults)
    }
}
