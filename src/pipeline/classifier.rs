//! Classifier (C11): pure, side-effect-free mapping from a request to a
//! route name, driven entirely by configured rules (§4.11).

use crate::config::ClassifierRule;
use crate::runtime::ClientProtocol;
use gateway_schema::canonical::CanonicalRequest;

pub const DEFAULT_ROUTE: &str = "default";

/// Rough token-budget estimate: total character count of every message's
/// text content divided by 4, the same heuristic the teacher's debug-sample
/// capture uses for logging request size.
fn estimate_tokens(request: &CanonicalRequest) -> u64 {
    let system_len = request.system.as_deref().map_or(0, str::len);
    let messages_len: usize = request
        .messages
        .iter()
        .map(|m| m.content.as_deref().map_or(0, str::len))
        .sum();
    ((system_len + messages_len) as u64) / 4
}

fn has_image(request: &CanonicalRequest) -> bool {
    request.messages.iter().any(|m| !m.extra_content_blocks.is_empty())
}

fn wants_web_search(request: &CanonicalRequest) -> bool {
    request
        .extra
        .get("webSearch")
        .or_else(|| request.extra.get("web_search"))
        .is_some_and(|v| v.as_bool().unwrap_or(false))
}

fn rule_matches(rule: &ClassifierRule, request: &CanonicalRequest) -> bool {
    if let Some(min_tokens) = rule.min_estimated_tokens {
        if estimate_tokens(request) < min_tokens {
            return false;
        }
    }
    if let Some(min_tools) = rule.min_tool_count {
        if request.tools.len() < min_tools {
            return false;
        }
    }
    if rule.requires_image && !has_image(request) {
        return false;
    }
    if let Some(hint) = &rule.model_hint {
        if !request.model.contains(hint.as_str()) {
            return false;
        }
    }
    if rule.requires_web_search && !wants_web_search(request) {
        return false;
    }
    true
}

/// Classifies `request` into a route name. Signals considered: estimated
/// token budget, tool count, image presence, model-name hints, and a
/// `webSearch` flag (§4.11). `_endpoint`/`_protocol` are accepted to keep the
/// signature matching the spec's `(request, endpoint, protocol)` contract
/// even though the current rule set doesn't branch on them.
pub fn classify(
    request: &CanonicalRequest,
    _endpoint: &str,
    _protocol: ClientProtocol,
    rules: &[ClassifierRule],
) -> String {
    rules
        .iter()
        .find(|rule| rule_matches(rule, request))
        .map(|rule| rule.route.clone())
        .unwrap_or_else(|| DEFAULT_ROUTE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_schema::canonical::{CanonicalMessage, CanonicalRole, CanonicalToolDecl};

    fn base_request() -> CanonicalRequest {
        CanonicalRequest {
            model: "gpt-4".to_string(),
            system: None,
            messages: vec![CanonicalMessage::text(CanonicalRole::User, "hi")],
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: Vec::new(),
            extra: Default::default(),
        }
    }

    #[test]
    fn falls_back_to_default_route_with_no_rules() {
        let request = base_request();
        assert_eq!(classify(&request, "/v1/chat/completions", ClientProtocol::OpenaiChat, &[]), DEFAULT_ROUTE);
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut request = base_request();
        request.tools.push(CanonicalToolDecl {
            name: "search".to_string(),
            description: None,
            parameters: serde_json::json!({}),
        });
        let rules = vec![
            ClassifierRule { route: "tool".to_string(), min_tool_count: Some(1), ..Default::default() },
            ClassifierRule { route: "vision".to_string(), requires_image: true, ..Default::default() },
        ];
        assert_eq!(classify(&request, "/v1/chat/completions", ClientProtocol::OpenaiChat, &rules), "tool");
    }

    #[test]
    fn model_hint_matches_substring() {
        let request = base_request();
        let rules = vec![ClassifierRule {
            route: "gpt4".to_string(),
            model_hint: Some("gpt-4".to_string()),
            ..Default::default()
        }];
        assert_eq!(classify(&request, "/v1/chat/completions", ClientProtocol::OpenaiChat, &rules), "gpt4");
    }

    #[test]
    fn web_search_flag_drives_a_rule() {
        let mut request = base_request();
        request.extra.insert("webSearch".to_string(), serde_json::json!(true));
        let rules = vec![ClassifierRule {
            route: "search".to_string(),
            requires_web_search: true,
            ..Default::default()
        }];
        assert_eq!(classify(&request, "/v1/chat/completions", ClientProtocol::OpenaiChat, &rules), "search");
    }
}
