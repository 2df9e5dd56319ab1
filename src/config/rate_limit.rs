use serde::{Deserialize, Serialize};

/// Fallback cooldown durations applied when an upstream 429/error carries no
/// explicit retry-after hint (§4.2/§4.9), plus the OAuth callback leniency
/// toggle used by headful device-flow automation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitDefaultsConfig {
    /// Duration string (see the `parse` duration grammar) used when a daily
    /// quota error is detected but carries no parseable delay.
    /// `ROUTECODEX_RL_DEFAULT_QUOTA_COOLDOWN`. Default `"5m"`.
    #[serde(default = "default_quota_cooldown")]
    pub default_quota_cooldown: String,

    /// Duration string used when a generic capacity-exhausted error carries
    /// no parseable delay. `ROUTECODEX_RL_CAPACITY_COOLDOWN`. Default `"30s"`.
    #[serde(default = "default_capacity_cooldown")]
    pub capacity_cooldown: String,

    /// Accept an OAuth callback whose `state` doesn't match the one issued,
    /// for headful automation where the browser may lose query params.
    /// `ROUTECODEX_OAUTH_LENIENT_STATE`. Default `false`.
    #[serde(default)]
    pub oauth_lenient_state: bool,
}

impl Default for RateLimitDefaultsConfig {
    fn default() -> Self {
        Self {
            default_quota_cooldown: default_quota_cooldown(),
            capacity_cooldown: default_capacity_cooldown(),
            oauth_lenient_state: false,
        }
    }
}

fn default_quota_cooldown() -> String {
    "5m".to_string()
}
fn default_capacity_cooldown() -> String {
    "30s".to_string()
}
