//! Pipeline Pool / RR Scheduler (C12): per-route round-robin over
//! `(providerKey, model)` candidates, skipping anything under a live
//! cooldown (§4.12). Distinct from the per-credential `CredentialManager`
//! (C4) — this scheduler operates at the route/pipeline granularity, after
//! C11 has already picked a route.

use crate::config::{PipelineEntry, RoutesConfig, Vendor};
use crate::rate_limit::{bucket_key, RateLimitState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The chosen pipeline for one request: a provider/model pair plus whether
/// every candidate in the pool was cooling (so the caller should surface a
/// 503/429 rather than dispatch through a guaranteed-to-fail pick).
#[derive(Debug, Clone)]
pub struct PoolPick {
    pub provider_key: String,
    pub model: String,
    pub all_cooling: bool,
}

struct RoutePool {
    candidates: Vec<PipelineEntry>,
    cursor: AtomicUsize,
}

/// Immutable after boot (§5): built once from `RoutesConfig` and shared via
/// `Arc` across every request task; no lock is needed beyond each route's
/// atomic cursor.
pub struct PipelinePool {
    routes: HashMap<String, RoutePool>,
}

/// A candidate is cooling if its rate-limit bucket is escalated (I3, every
/// vendor) or its model series is under a live series cooldown (§4.2,
/// Gemini-CLI family only — `series_cooling` is a no-op for other models).
/// The Gemini-CLI-family bucket policy is derived per-candidate from its own
/// `provider_key` (via `Vendor::from_provider_key`) rather than assumed
/// uniform across the pool, so a route mixing vendors buckets each
/// candidate correctly.
fn is_cooling(candidate: &PipelineEntry, rate_limit: &RateLimitState) -> bool {
    let vendor_segment = candidate.provider_key.split('_').next().unwrap_or(&candidate.provider_key);
    let is_gemini_cli_family = Vendor::from_provider_key(&candidate.provider_key)
        .is_some_and(Vendor::is_gemini_cli_family);
    let key = bucket_key(&candidate.provider_key, &candidate.model, is_gemini_cli_family);
    rate_limit.is_escalated(&key) || rate_limit.series_cooling(vendor_segment, &candidate.model)
}

impl PipelinePool {
    pub fn from_config(routes: &RoutesConfig) -> Self {
        let routes = routes
            .pools
            .iter()
            .map(|(name, candidates)| {
                (
                    name.clone(),
                    RoutePool { candidates: candidates.clone(), cursor: AtomicUsize::new(0) },
                )
            })
            .collect();
        Self { routes }
    }

    /// Picks the next non-cooling candidate for `route_name`, optionally
    /// restricted to candidates whose vendor (the segment before the first
    /// `_` in `providerKey`) matches `vendor_pin`.
    pub fn pick(
        &self,
        route_name: &str,
        rate_limit: &RateLimitState,
        vendor_pin: Option<&str>,
    ) -> Option<PoolPick> {
        let pool = self.routes.get(route_name)?;
        if pool.candidates.is_empty() {
            return None;
        }

        let eligible: Vec<&PipelineEntry> = match vendor_pin {
            Some(vendor) => pool
                .candidates
                .iter()
                .filter(|c| c.provider_key.split('_').next() == Some(vendor))
                .collect(),
            None => pool.candidates.iter().collect(),
        };
        if eligible.is_empty() {
            return None;
        }

        let len = eligible.len();
        for _ in 0..len {
            let idx = pool.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let candidate = eligible[idx];
            if !is_cooling(candidate, rate_limit) {
                return Some(PoolPick {
                    provider_key: candidate.provider_key.clone(),
                    model: candidate.model.clone(),
                    all_cooling: false,
                });
            }
        }

        // All cooling: return the least-cooling (first eligible) candidate
        // anyway and let C6 fail through; the caller surfaces a 503/429.
        let fallback = eligible[0];
        Some(PoolPick {
            provider_key: fallback.provider_key.clone(),
            model: fallback.model.clone(),
            all_cooling: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn pool_with(entries: Vec<(&str, &str)>) -> PipelinePool {
        let mut pools = BTreeMap::new();
        pools.insert(
            "default".to_string(),
            entries
                .into_iter()
                .map(|(provider_key, model)| PipelineEntry {
                    provider_key: provider_key.to_string(),
                    model: model.to_string(),
                })
                .collect(),
        );
        PipelinePool::from_config(&RoutesConfig { rules: Vec::new(), pools })
    }

    #[test]
    fn visits_every_candidate_within_pool_size_picks() {
        let pool = pool_with(vec![("openai_a", "gpt-4"), ("openai_b", "gpt-4")]);
        let rl = RateLimitState::default();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2 {
            let pick = pool.pick("default", &rl, None).unwrap();
            seen.insert(pick.provider_key);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn skips_escalated_candidate() {
        let pool = pool_with(vec![("openai_a", "gpt-4"), ("openai_b", "gpt-4")]);
        let rl = RateLimitState::default();
        rl.force_escalate(&bucket_key("openai_a", "gpt-4", false));
        for _ in 0..4 {
            let pick = pool.pick("default", &rl, None).unwrap();
            assert_eq!(pick.provider_key, "openai_b");
        }
    }

    #[test]
    fn vendor_pin_restricts_candidates() {
        let pool = pool_with(vec![("openai_a", "gpt-4"), ("anthropic_a", "claude-3")]);
        let rl = RateLimitState::default();
        let pick = pool.pick("default", &rl, Some("anthropic")).unwrap();
        assert_eq!(pick.provider_key, "anthropic_a");
    }

    #[test]
    fn all_cooling_returns_fallback_with_flag_set() {
        let pool = pool_with(vec![("openai_a", "gpt-4")]);
        let rl = RateLimitState::default();
        rl.force_escalate(&bucket_key("openai_a", "gpt-4", false));
        let pick = pool.pick("default", &rl, None).unwrap();
        assert!(pick.all_cooling);
    }
}
