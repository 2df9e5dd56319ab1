//! Usage/Error Sink (C15): best-effort delivery of usage and error events
//! (§2, §7). Out-of-process telemetry transport is a named external
//! collaborator; this module specifies the interface and a tracing-backed
//! default implementation.

use gateway_schema::canonical::CanonicalUsage;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub request_id: String,
    pub provider_key: String,
    pub model: String,
    pub usage: CanonicalUsage,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub request_id: String,
    pub provider_key: String,
    pub message: String,
    pub status: Option<u16>,
    /// Never the raw apiKey — always the `sha256:<hex16>` fingerprint (I4).
    pub key_fingerprint: Option<String>,
}

/// Delivery is best-effort: a sink implementation must never propagate a
/// failure back to the request path.
pub trait EventSink: Send + Sync {
    fn emit_usage(&self, event: UsageEvent);
    fn emit_error(&self, event: ErrorEvent);
}

/// Default sink: structured `tracing` events. Sufficient for local/dev
/// deployments; a production deployment swaps in a sink that forwards to an
/// external event bus without changing any caller.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit_usage(&self, event: UsageEvent) {
        info!(
            request_id = %event.request_id,
            provider_key = %event.provider_key,
            model = %event.model,
            prompt_tokens = event.usage.prompt_tokens,
            completion_tokens = event.usage.completion_tokens,
            total_tokens = event.usage.total_tokens,
            processing_time_ms = event.processing_time_ms,
            "usage"
        );
    }

    fn emit_error(&self, event: ErrorEvent) {
        warn!(
            request_id = %event.request_id,
            provider_key = %event.provider_key,
            status = event.status,
            key_fingerprint = event.key_fingerprint.as_deref().unwrap_or(""),
            message = %event.message,
            "provider_error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_event_never_carries_raw_key_field() {
        // Compile-time guarantee: ErrorEvent has no `api_key` field at all,
        // only `key_fingerprint`. This test documents that invariant (I4)
        // for anyone adding a field to the struct later.
        let event = ErrorEvent {
            request_id: "r".into(),
            provider_key: "pk".into(),
            message: "boom".into(),
            status: Some(500),
            key_fingerprint: Some("sha256:deadbeefcafebabe".into()),
        };
        assert!(event.key_fingerprint.unwrap().starts_with("sha256:"));
    }
}
