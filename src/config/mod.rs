mod basic;
mod providers;
mod rate_limit;
mod routes;

pub use basic::BasicConfig;
pub use providers::{
    ProviderDefaults, ProvidersConfig, Vendor, VendorConfig, VendorOauthConfig,
    VendorResolvedConfig,
};
pub use rate_limit::RateLimitDefaultsConfig;
pub use routes::{ClassifierRule, PipelineEntry, RoutesConfig};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core server configuration (see `basic` table in rcc.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Vendor family settings (see `providers` table in rcc.toml).
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Fallback cooldown durations used when an upstream error carries no
    /// explicit retry-after hint (see `rate_limit` table in rcc.toml).
    #[serde(default)]
    pub rate_limit: RateLimitDefaultsConfig,

    /// Classifier rules and route → pipeline pools (see `routes` table in rcc.toml).
    #[serde(default)]
    pub routes: RoutesConfig,
}

const DEFAULT_CONFIG_FILE: &str = "rcc.toml";

impl Config {
    /// Builds a Figment that merges defaults, an optional TOML file, and
    /// environment variables under the `RCC_*`/`ROUTECODEX_*` prefixes.
    ///
    /// `RCC_*` variables land on the `basic` table; `ROUTECODEX_RL_*` lands on
    /// `rate_limit`; `ROUTECODEX_OAUTH_LENIENT_STATE` lands on
    /// `rate_limit.oauth_lenient_state`. The config file path itself is
    /// resolved from `RCC_CONFIG_PATH`, defaulting to `./rcc.toml`.
    pub fn figment() -> Figment {
        let config_path =
            std::env::var("RCC_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(&config_path).is_file() {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment
            .merge(Env::prefixed("RCC_").map(|key| format!("basic.{key}").into()))
            .merge(Env::prefixed("ROUTECODEX_RL_").map(|key| format!("rate_limit.{key}").into()))
            .merge(
                Env::raw()
                    .only(&["ROUTECODEX_OAUTH_LENIENT_STATE"])
                    .map(|_| "rate_limit.oauth_lenient_state".into()),
            )
    }

    /// Loads configuration by merging defaults, an optional config file, and
    /// environment variables.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional rcc.toml + env): {err}")
        })
    }

    /// Loads configuration for the running binary. `basic.gateway_key` is
    /// intentionally optional: an empty value disables the C13.1 auth guard
    /// rather than failing boot (§6).
    pub fn from_env() -> Self {
        Self::from_optional_toml()
    }

    /// Whether the C13.1 auth guard should be enforced on non-health routes.
    pub fn auth_guard_enabled(&self) -> bool {
        !self.basic.gateway_key.trim().is_empty()
    }

    pub fn resolve(&self, vendor: Vendor) -> VendorResolvedConfig {
        self.providers.resolve(vendor)
    }
}

/// Global, lazily-initialized configuration instance.
pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_optional_toml);
