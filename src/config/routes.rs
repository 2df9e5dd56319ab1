use serde::{Deserialize, Serialize};

/// One classifier rule: if all present conditions match, the request is
/// assigned to `route`. Rules are tried top-to-bottom; the first match wins.
/// Absent fields are wildcards (§4.11).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ClassifierRule {
    pub route: String,
    /// Matches when the estimated prompt token budget is >= this value.
    #[serde(default)]
    pub min_estimated_tokens: Option<u64>,
    /// Matches when the request declares at least this many tools.
    #[serde(default)]
    pub min_tool_count: Option<usize>,
    /// Matches when any message carries image content.
    #[serde(default)]
    pub requires_image: bool,
    /// Matches when the requested model name contains this substring.
    #[serde(default)]
    pub model_hint: Option<String>,
    /// Matches when the request sets a truthy `webSearch` flag.
    #[serde(default)]
    pub requires_web_search: bool,
}

/// One pipeline entry in a route's pool: the `(providerKey, model)` pair the
/// RR scheduler round-robins over for that route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineEntry {
    pub provider_key: String,
    pub model: String,
}

/// Route-name → candidate pipeline pool, populated at boot from config and
/// treated as immutable thereafter (§5: "RoutePools are immutable after
/// boot; no lock needed").
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RoutesConfig {
    #[serde(default)]
    pub rules: Vec<ClassifierRule>,
    #[serde(default)]
    pub pools: std::collections::BTreeMap<String, Vec<PipelineEntry>>,
}

impl RoutesConfig {
    pub fn pool(&self, route_name: &str) -> Option<&[PipelineEntry]> {
        self.pools.get(route_name).map(Vec::as_slice)
    }
}
