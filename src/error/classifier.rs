//! Error Classifier (C1): turns an opaque upstream failure into a typed,
//! structured shape the rest of the pipeline can reason about without
//! re-parsing text at every call site.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;

static HTTP_STATUS_IN_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"HTTP (\d{3})").expect("static regex"));

static QUOTA_RESET_DELAY_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"quotaResetDelay["']?\s*[:=]\s*"([^"]+)""#).expect("static regex")
});

const NETWORK_TRANSPORT_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "EHOSTUNREACH",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
    "ETIMEDOUT",
    "ECONNABORTED",
];

const NETWORK_TRANSPORT_HINTS: &[&str] = &[
    "fetch failed",
    "socket hang up",
    "tls handshake timeout",
    "connection reset",
    "connection refused",
];

const DAILY_QUOTA_HINTS: &[&str] = &[
    "daily cost limit",
    "daily quota",
    "quota has been exhausted",
    "quota exceeded",
    "resource has been exhausted",
    "resource_exhausted",
    "余额不足",
    "无可用资源包",
];

const CAPACITY_EXHAUSTED_HINTS: &[&str] = &["no capacity available", "model_capacity_exhausted"];

/// Classified shape of an upstream failure (§4.1).
#[derive(Debug, Clone)]
pub struct UpstreamErrorInfo {
    pub message: String,
    pub status_code: Option<u16>,
    pub upstream_code: Option<String>,
    pub upstream_message: Option<String>,
    pub is_rate_limit: bool,
    pub is_recoverable: bool,
    pub affects_health: bool,
    pub is_network_transport: bool,
    pub quota_delay: Option<Duration>,
}

fn get_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_str()
}

fn get_u16(value: &Value, path: &[&str]) -> Option<u16> {
    let mut cur = value;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_u64().and_then(|n| u16::try_from(n).ok())
}

/// Walks `path` to an array (e.g. `error.details[*]`, §4.1) and returns the
/// first element that has a string `field`.
fn get_str_in_array<'a>(value: &'a Value, path: &[&str], field: &str) -> Option<&'a str> {
    let mut cur = value;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_array()?.iter().find_map(|item| item.get(field).and_then(Value::as_str))
}

fn status_code_from_message(message: &str) -> Option<u16> {
    HTTP_STATUS_IN_MESSAGE
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parses durations of the shape `"2m30s"`, `"45s"`, `"45"` (bare seconds),
/// or `""`/garbage → `None`. Accepts any concatenation of `{Nh, Nm, Ns, Nms}`
/// segments. Result is capped at 3h (L2).
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Some(cap(Duration::from_secs(secs)));
    }

    static SEGMENT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d+)(ms|h|m|s)").expect("static regex"));

    let mut total_ms: u64 = 0;
    let mut matched_any = false;
    let mut consumed = 0usize;
    for cap_m in SEGMENT.captures_iter(input) {
        matched_any = true;
        let whole = cap_m.get(0).expect("group 0 always present");
        consumed += whole.as_str().len();
        let n: u64 = cap_m[1].parse().ok()?;
        total_ms += match &cap_m[2] {
            "h" => n * 3_600_000,
            "m" => n * 60_000,
            "s" => n * 1_000,
            "ms" => n,
            _ => unreachable!(),
        };
    }

    if !matched_any || consumed != input.len() {
        return None;
    }
    Some(cap(Duration::from_millis(total_ms)))
}

fn cap(d: Duration) -> Duration {
    d.min(Duration::from_secs(3 * 3600))
}

/// Extracts a `quotaResetDelay`/`quotaResetTimeStamp` hint, falling back to
/// the family-appropriate default when a quota condition is known but no
/// delay was present in the payload.
fn extract_quota_delay(
    body: Option<&Value>,
    haystack: &str,
    is_daily_quota: bool,
    default_quota_cooldown: Duration,
    default_capacity_cooldown: Duration,
) -> Option<Duration> {
    if let Some(body) = body {
        if let Some(s) = get_str_in_array(body, &["error", "details"], "quotaResetDelay") {
            if let Some(d) = parse_duration(s) {
                return Some(d);
            }
        }
        for path in [
            &["error", "metadata", "quotaResetDelay"][..],
            &["quotaResetDelay"][..],
        ] {
            if let Some(s) = get_str(body, path) {
                if let Some(d) = parse_duration(s) {
                    return Some(d);
                }
            }
        }
        if let Some(ts) = get_str(body, &["quotaResetTimeStamp"]) {
            if let Ok(reset_at) = ts.parse::<i64>() {
                let now = chrono::Utc::now().timestamp_millis();
                if reset_at > now {
                    return Some(cap(Duration::from_millis((reset_at - now) as u64)));
                }
            }
        }
    }

    if let Some(m) = QUOTA_RESET_DELAY_IN_TEXT.captures(haystack) {
        if let Some(d) = parse_duration(&m[1]) {
            return Some(d);
        }
    }

    let lower = haystack.to_ascii_lowercase();
    if CAPACITY_EXHAUSTED_HINTS.iter().any(|h| lower.contains(h)) {
        return Some(default_capacity_cooldown);
    }
    if is_daily_quota {
        return Some(default_quota_cooldown);
    }
    None
}

/// Classifies an upstream response. `status` is the transport-reported HTTP
/// status if one exists; `body` is the parsed JSON payload, when any;
/// `message`/`network_error_code` come from the transport error path.
pub fn classify(
    status: Option<u16>,
    body: Option<&Value>,
    message: &str,
    network_error_code: Option<&str>,
    default_quota_cooldown: Duration,
    default_capacity_cooldown: Duration,
) -> UpstreamErrorInfo {
    let upstream_code = body.and_then(|b| get_str(b, &["error", "code"]).map(str::to_string));
    let upstream_message =
        body.and_then(|b| get_str(b, &["error", "message"]).map(str::to_string));

    let status_code = status
        .or_else(|| body.and_then(|b| get_u16(b, &["status"])))
        .or_else(|| body.and_then(|b| get_u16(b, &["statusCode"])))
        .or_else(|| status_code_from_message(message))
        .unwrap_or(500);

    let haystack = format!(
        "{} {}",
        message,
        upstream_message.as_deref().unwrap_or("")
    )
    .to_ascii_lowercase();

    let is_network_transport = network_error_code
        .map(|c| NETWORK_TRANSPORT_CODES.contains(&c))
        .unwrap_or(false)
        || NETWORK_TRANSPORT_HINTS.iter().any(|h| haystack.contains(h));

    let is_recoverable = matches!(status_code, 400 | 429) || is_network_transport;

    let is_rate_limit = status_code == 429 || haystack.contains("429");

    let is_daily_quota = is_rate_limit
        && DAILY_QUOTA_HINTS.iter().any(|h| haystack.contains(h))
        && !CAPACITY_EXHAUSTED_HINTS.iter().any(|h| haystack.contains(h));

    let quota_delay = if is_rate_limit {
        extract_quota_delay(
            body,
            &haystack,
            is_daily_quota,
            default_quota_cooldown,
            default_capacity_cooldown,
        )
    } else {
        None
    };

    let affects_health = !is_recoverable || is_daily_quota;

    UpstreamErrorInfo {
        message: message.to_string(),
        status_code: Some(status_code),
        upstream_code,
        upstream_message,
        is_rate_limit,
        is_recoverable,
        affects_health,
        is_network_transport,
        quota_delay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parser_matches_l2() {
        assert_eq!(parse_duration("2m30s"), Some(Duration::from_secs(150)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(
            parse_duration("10h"),
            Some(Duration::from_secs(3 * 3600))
        );
    }

    #[test]
    fn quota_reset_delay_extracted_from_details_array_s6() {
        let body = serde_json::json!({
            "error": {
                "message": "quota exceeded",
                "details": [{"quotaResetDelay": "2m30s"}]
            }
        });
        let info = classify(
            Some(429),
            Some(&body),
            "quota exceeded",
            None,
            Duration::from_secs(60 * 5),
            Duration::from_secs(30),
        );
        assert_eq!(info.quota_delay, Some(Duration::from_secs(150)));
    }

    #[test]
    fn daily_quota_chinese_hints_detected() {
        let info = classify(
            Some(429),
            None,
            "余额不足, please top up",
            None,
            Duration::from_secs(60 * 60 * 24),
            Duration::from_secs(30),
        );
        assert!(info.is_rate_limit);
        assert_eq!(info.quota_delay, Some(Duration::from_secs(60 * 60 * 24)));
    }

    #[test]
    fn capacity_exhausted_is_not_daily_quota() {
        let info = classify(
            Some(429),
            None,
            "no capacity available right now",
            None,
            Duration::from_secs(60 * 60 * 24),
            Duration::from_secs(30),
        );
        assert_eq!(info.quota_delay, Some(Duration::from_secs(30)));
    }

    #[test]
    fn status_from_message_regex() {
        let info = classify(
            None,
            None,
            "upstream failed with HTTP 503 Service Unavailable",
            None,
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        assert_eq!(info.status_code, Some(503));
        assert!(!info.is_recoverable);
    }

    #[test]
    fn network_transport_is_recoverable() {
        let info = classify(
            None,
            None,
            "request failed",
            Some("ECONNRESET"),
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        assert!(info.is_network_transport);
        assert!(info.is_recoverable);
    }
}
