//! Auth Header Builder (C5): turns a leased credential into the concrete
//! `Authorization` plus vendor-specific headers a pipeline attaches before
//! dispatch (§4.5).

use crate::config::Vendor;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};

/// The bare minimum a credential must expose to build auth headers; kept
/// separate from `credentials::Credential` so this module has no dependency
/// on the persistence layer.
pub struct CredentialAuthView<'a> {
    pub access_token: &'a str,
    pub api_key: Option<&'a str>,
    pub token_type: Option<&'a str>,
}

/// Extra per-request identity the Codex CLI surface expects; synthesized
/// deterministically from `request_id`/`route_name` when the client didn't
/// supply its own.
pub struct IdentityHints<'a> {
    pub request_id: &'a str,
    pub route_name: &'a str,
    pub session_id: Option<&'a str>,
    pub conversation_id: Option<&'a str>,
}

const MAX_HEADER_LEN: usize = 64;

/// Truncates an identity header value to `MAX_HEADER_LEN`, replacing any
/// overflow with a sha256 prefix of the original so collisions stay rare.
fn bounded_identity(value: &str) -> String {
    if value.len() <= MAX_HEADER_LEN {
        return value.to_string();
    }
    let digest = Sha256::digest(value.as_bytes());
    let prefix = hex_prefix(&digest, 16);
    format!("{prefix}-{}", &value[..MAX_HEADER_LEN.saturating_sub(prefix.len() + 1)])
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes.iter().take(len / 2).map(|b| format!("{b:02x}")).collect()
}

fn derive_session_id(request_id: &str, route_name: &str) -> String {
    let digest = Sha256::digest(format!("session:{route_name}:{request_id}").as_bytes());
    bounded_identity(&hex_prefix(&digest, MAX_HEADER_LEN))
}

fn derive_conversation_id(request_id: &str, route_name: &str) -> String {
    let digest = Sha256::digest(format!("conversation:{route_name}:{request_id}").as_bytes());
    bounded_identity(&hex_prefix(&digest, MAX_HEADER_LEN))
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: String) {
    if let Ok(hv) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static(name), hv);
    }
}

/// Builds the headers a request to `vendor` should carry, given the leased
/// credential and the request's identity hints.
pub fn build_headers(
    vendor: Vendor,
    credential: &CredentialAuthView<'_>,
    identity: &IdentityHints<'_>,
    streaming: bool,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let auth_value = if let Some(api_key) = credential.api_key {
        format!("Bearer {api_key}")
    } else {
        let token_type = credential.token_type.unwrap_or("Bearer");
        format!("{token_type} {}", credential.access_token)
    };
    insert(&mut headers, "authorization", auth_value);

    match vendor {
        Vendor::OpenaiChat => {
            let session_id = identity
                .session_id
                .map(bounded_identity)
                .unwrap_or_else(|| derive_session_id(identity.request_id, identity.route_name));
            let conversation_id = identity
                .conversation_id
                .map(bounded_identity)
                .unwrap_or_else(|| derive_conversation_id(identity.request_id, identity.route_name));
            insert(&mut headers, "session_id", session_id);
            insert(&mut headers, "conversation_id", conversation_id);
            insert(&mut headers, "originator", "codex_cli_rs".to_string());
            insert(&mut headers, "user-agent", "codex_cli_rs/0.1".to_string());
        }
        Vendor::Gemini => {
            // Antigravity routes through the Gemini vendor family; it must
            // never see session/conversation identity headers.
            headers.remove("session_id");
            headers.remove("conversation_id");
            insert(&mut headers, "x-goog-api-client", "gl-rust/gemini-cli".to_string());
            if streaming {
                insert(&mut headers, "accept", "text/event-stream".to_string());
            }
        }
        Vendor::Iflow => {
            insert(&mut headers, "x-iflow-client", "iflow-cli-rs".to_string());
        }
        Vendor::Anthropic | Vendor::Qwen | Vendor::Glm => {}
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_api_key_over_access_token() {
        let credential = CredentialAuthView {
            access_token: "raw-token",
            api_key: Some("derived-key"),
            token_type: None,
        };
        let identity = IdentityHints {
            request_id: "req-1",
            route_name: "default",
            session_id: None,
            conversation_id: None,
        };
        let headers = build_headers(Vendor::Anthropic, &credential, &identity, false);
        assert_eq!(headers.get("authorization").unwrap(), "Bearer derived-key");
    }

    #[test]
    fn antigravity_strips_identity_headers() {
        let credential = CredentialAuthView {
            access_token: "tok",
            api_key: None,
            token_type: None,
        };
        let identity = IdentityHints {
            request_id: "req-1",
            route_name: "default",
            session_id: Some("sess"),
            conversation_id: Some("conv"),
        };
        let headers = build_headers(Vendor::Gemini, &credential, &identity, true);
        assert!(!headers.contains_key("session_id"));
        assert!(!headers.contains_key("conversation_id"));
        assert_eq!(headers.get("accept").unwrap(), "text/event-stream");
    }

    #[test]
    fn openai_chat_derives_bounded_identity_headers() {
        let credential = CredentialAuthView {
            access_token: "tok",
            api_key: None,
            token_type: None,
        };
        let identity = IdentityHints {
            request_id: "req-1",
            route_name: "default",
            session_id: None,
            conversation_id: None,
        };
        let headers = build_headers(Vendor::OpenaiChat, &credential, &identity, false);
        let session_id = headers.get("session_id").unwrap().to_str().unwrap();
        assert!(session_id.len() <= MAX_HEADER_LEN);
    }
}
