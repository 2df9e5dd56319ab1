//! Rate-Limit & Cooldown State (C2): per-bucket consecutive-429 counters and
//! the model-series cooldown directives derived from quota signals.
//!
//! State is process-global and shared across every in-flight request, so all
//! mutation goes through a single `Mutex<HashMap<..>>` critical section per
//! §4.2/§5 — the same granularity the credential scheduler (C4) uses for its
//! own in-memory state, rather than fine-grained per-entry locks.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Escalation threshold: 4 consecutive 429s on one bucket mark it unhealthy (I3).
const ESCALATION_THRESHOLD: u32 = 4;

/// Series cooldown directives are capped at 3 hours regardless of source.
const MAX_COOLDOWN: Duration = Duration::from_secs(3 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSeries {
    Claude,
    GeminiPro,
    GeminiFlash,
}

impl ModelSeries {
    /// Classifies a model name into a series by lower-cased keyword match,
    /// only meaningful for the Gemini-CLI family (§4.2).
    pub fn from_model_name(model: &str) -> Option<Self> {
        let lower = model.to_ascii_lowercase();
        if lower.contains("claude") || lower.contains("opus") {
            Some(ModelSeries::Claude)
        } else if lower.contains("flash") {
            Some(ModelSeries::GeminiFlash)
        } else if lower.contains("gemini") || lower.contains("pro") {
            Some(ModelSeries::GeminiPro)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelSeries::Claude => "claude",
            ModelSeries::GeminiPro => "gemini-pro",
            ModelSeries::GeminiFlash => "gemini-flash",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownSource {
    QuotaResetDelay,
    QuotaExhaustedFallback,
    CapacityExhaustedFallback,
}

impl CooldownSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CooldownSource::QuotaResetDelay => "quota_reset_delay",
            CooldownSource::QuotaExhaustedFallback => "quota_exhausted_fallback",
            CooldownSource::CapacityExhaustedFallback => "capacity_exhausted_fallback",
        }
    }
}

/// Emitted alongside a rate-limit error for the Gemini-CLI family; C12
/// consumes this to skip every pipeline in the same model series (§3).
#[derive(Debug, Clone)]
pub struct SeriesCooldownDirective {
    pub provider_id: String,
    pub provider_key: Option<String>,
    pub model: Option<String>,
    pub series: ModelSeries,
    pub cooldown: Duration,
    pub source: CooldownSource,
    pub expires_at: DateTime<Utc>,
}

impl SeriesCooldownDirective {
    pub fn new(
        provider_id: impl Into<String>,
        provider_key: Option<String>,
        model: Option<String>,
        series: ModelSeries,
        cooldown: Duration,
        source: CooldownSource,
    ) -> Self {
        let capped = cooldown.min(MAX_COOLDOWN);
        Self {
            provider_id: provider_id.into(),
            provider_key,
            model,
            series,
            cooldown: capped,
            source,
            expires_at: Utc::now() + chrono::Duration::from_std(capped).unwrap_or_default(),
        }
    }

    pub fn is_live(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

#[derive(Debug, Default)]
struct RateLimitBucket {
    consecutive_429: u32,
}

/// Process-global rate-limit/cooldown state (§3, §4.2).
pub struct RateLimitState {
    buckets: Mutex<HashMap<String, RateLimitBucket>>,
    series_cooldowns: Mutex<Vec<SeriesCooldownDirective>>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            series_cooldowns: Mutex::new(Vec::new()),
        }
    }

    /// Increments the bucket's counter. Returns `true` (and resets it to 0)
    /// iff the new value reaches the escalation threshold.
    pub fn record_429(&self, bucket_key: &str) -> bool {
        let mut buckets = self.buckets.lock().expect("rate-limit mutex poisoned");
        let bucket = buckets.entry(bucket_key.to_string()).or_default();
        bucket.consecutive_429 += 1;
        if bucket.consecutive_429 >= ESCALATION_THRESHOLD {
            bucket.consecutive_429 = 0;
            true
        } else {
            false
        }
    }

    /// Forces immediate escalation (daily-quota 429s skip the counter).
    pub fn force_escalate(&self, bucket_key: &str) {
        let mut buckets = self.buckets.lock().expect("rate-limit mutex poisoned");
        buckets.entry(bucket_key.to_string()).or_default().consecutive_429 = ESCALATION_THRESHOLD;
    }

    /// Resets the bucket to 0 on any success or non-rate-limit error.
    pub fn reset(&self, bucket_key: &str) {
        let mut buckets = self.buckets.lock().expect("rate-limit mutex poisoned");
        if let Some(bucket) = buckets.get_mut(bucket_key) {
            bucket.consecutive_429 = 0;
        }
    }

    pub fn consecutive_429(&self, bucket_key: &str) -> u32 {
        self.buckets
            .lock()
            .expect("rate-limit mutex poisoned")
            .get(bucket_key)
            .map(|b| b.consecutive_429)
            .unwrap_or(0)
    }

    pub fn is_escalated(&self, bucket_key: &str) -> bool {
        self.consecutive_429(bucket_key) >= ESCALATION_THRESHOLD
    }

    /// Registers a series-wide cooldown directive, evicting expired ones.
    pub fn push_series_cooldown(&self, directive: SeriesCooldownDirective) {
        let mut cooldowns = self.series_cooldowns.lock().expect("series-cooldown mutex poisoned");
        cooldowns.retain(|d| d.is_live());
        cooldowns.push(directive);
    }

    /// True if `model`'s series is under a live cooldown for `provider_id`.
    pub fn series_cooling(&self, provider_id: &str, model: &str) -> bool {
        let Some(series) = ModelSeries::from_model_name(model) else {
            return false;
        };
        let cooldowns = self.series_cooldowns.lock().expect("series-cooldown mutex poisoned");
        cooldowns
            .iter()
            .any(|d| d.provider_id == provider_id && d.series == series && d.is_live())
    }
}

/// Bucket key policy (§4.2): Gemini-CLI family keys on `{providerKey}::{model}`;
/// everyone else keys on `providerKey` alone. Mirrors
/// `RuntimeMetadata::rate_limit_bucket_key`.
pub fn bucket_key(provider_key: &str, model: &str, is_gemini_cli_family: bool) -> String {
    if is_gemini_cli_family {
        format!("{provider_key}::{model}")
    } else {
        provider_key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_after_four_consecutive_429s() {
        let state = RateLimitState::new();
        assert!(!state.record_429("k"));
        assert!(!state.record_429("k"));
        assert!(!state.record_429("k"));
        assert!(state.record_429("k"));
        assert_eq!(state.consecutive_429("k"), 0);
    }

    #[test]
    fn success_resets_counter() {
        let state = RateLimitState::new();
        state.record_429("k");
        state.record_429("k");
        state.reset("k");
        assert_eq!(state.consecutive_429("k"), 0);
    }

    #[test]
    fn force_escalate_sets_to_threshold() {
        let state = RateLimitState::new();
        state.force_escalate("k");
        assert!(state.is_escalated("k"));
    }

    #[test]
    fn series_cooldown_quota_reset_delay_matches_s6() {
        let state = RateLimitState::new();
        let directive = SeriesCooldownDirective::new(
            "antigravity",
            Some("pk".to_string()),
            Some("claude-3-opus".to_string()),
            ModelSeries::Claude,
            Duration::from_secs(150),
            CooldownSource::QuotaResetDelay,
        );
        assert_eq!(directive.cooldown, Duration::from_secs(150));
        state.push_series_cooldown(directive);
        assert!(state.series_cooling("antigravity", "claude-3-opus-20240229"));
        assert!(!state.series_cooling("antigravity", "gemini-2.5-flash"));
    }

    #[test]
    fn series_cooldown_capped_at_three_hours() {
        let directive = SeriesCooldownDirective::new(
            "antigravity",
            None,
            None,
            ModelSeries::GeminiPro,
            Duration::from_secs(4 * 3600),
            CooldownSource::QuotaExhaustedFallback,
        );
        assert_eq!(directive.cooldown, Duration::from_secs(3 * 3600));
    }
}
