//! Compatibility Shaper (C7): vendor-specific request/response normalization
//! applied between translation (C8) and transport (C6) — and symmetrically
//! on the way back (§4.7).

use gateway_schema::canonical::{CanonicalMessage, CanonicalRole, CanonicalToolDecl};
use serde_json::Value;

/// Strips trailing `chat/`, `completions/`, `messages/` path segments,
/// collapses duplicate slashes, and applies two vendor-specific fixups.
/// Idempotent by construction (I5): re-running on an already-normalized URL
/// is a no-op because every step's output already satisfies its own input
/// precondition.
pub fn normalize_base_url(raw: &str) -> String {
    let mut url = raw.trim_end_matches('/').to_string();

    for suffix in ["chat/completions", "chat", "completions", "messages"] {
        let pattern = format!("/{suffix}");
        if let Some(stripped) = url.strip_suffix(&pattern) {
            url = stripped.to_string();
        }
    }

    url = collapse_duplicate_slashes(&url);

    if url.contains("api.openai.com") && !url.ends_with("/v1") {
        url.push_str("/v1");
    }
    if url.contains("open.bigmodel.cn") {
        if let Some(stripped) = url.strip_suffix("/v1") {
            url = stripped.to_string();
        }
    }

    url
}

fn collapse_duplicate_slashes(url: &str) -> String {
    let Some(scheme_pos) = url.find("://") else {
        return url.to_string();
    };
    let (scheme, rest) = url.split_at(scheme_pos + 3);
    let mut collapsed = String::with_capacity(rest.len());
    let mut prev_was_slash = false;
    for ch in rest.chars() {
        if ch == '/' {
            if prev_was_slash {
                continue;
            }
            prev_was_slash = true;
        } else {
            prev_was_slash = false;
        }
        collapsed.push(ch);
    }
    format!("{scheme}{collapsed}")
}

/// Merges consecutive assistant `tool_calls` blocks into one and coalesces
/// consecutive `tool` messages sharing a `tool_call_id` by joining their
/// content with `\n` (§4.7, S3). Preserves the (tool_call_id → concatenated
/// content) mapping (I6).
pub fn compact_messages(messages: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
    let mut out: Vec<CanonicalMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        match (out.last_mut(), message.role) {
            (Some(prev), CanonicalRole::Assistant)
                if prev.role == CanonicalRole::Assistant
                    && !prev.tool_calls.is_empty()
                    && !message.tool_calls.is_empty() =>
            {
                prev.tool_calls.extend(message.tool_calls);
            }
            (Some(prev), CanonicalRole::Tool)
                if prev.role == CanonicalRole::Tool
                    && prev.tool_call_id.is_some()
                    && prev.tool_call_id == message.tool_call_id =>
            {
                let joined = match (&prev.content, &message.content) {
                    (Some(a), Some(b)) => format!("{a}\n{b}"),
                    (Some(a), None) => a.clone(),
                    (None, Some(b)) => b.clone(),
                    (None, None) => String::new(),
                };
                prev.content = Some(joined);
            }
            _ => out.push(message),
        }
    }

    out
}

#[derive(Debug, thiserror::Error)]
pub enum ToolOutputError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("arguments for tool `{0}` are not valid JSON")]
    InvalidJson(String),
    #[error("tool `{tool}` call is missing required argument `{key}`")]
    MissingRequired { tool: String, key: String },
    #[error("tool `{tool}` call has unknown argument `{key}`")]
    UnknownArgument { tool: String, key: String },
    #[error("tool `{tool}` argument `{key}` has wrong type")]
    WrongType { tool: String, key: String },
}

/// Validates an assistant's emitted `tool_calls` against their declared
/// schemas (§4.7). Rejects unknown tool names, malformed JSON arguments,
/// missing required keys, unknown keys, and mismatched primitive types.
pub fn validate_tool_calls(
    message: &CanonicalMessage,
    tools: &[CanonicalToolDecl],
) -> Result<(), ToolOutputError> {
    for call in &message.tool_calls {
        let schema = tools
            .iter()
            .find(|t| t.name == call.name)
            .ok_or_else(|| ToolOutputError::UnknownTool(call.name.clone()))?;

        let args: Value = serde_json::from_str(&call.arguments)
            .map_err(|_| ToolOutputError::InvalidJson(call.name.clone()))?;
        let args_obj = args.as_object().cloned().unwrap_or_default();

        let properties = schema
            .parameters
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let required: Vec<String> = schema
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        for key in &required {
            if !args_obj.contains_key(key) {
                return Err(ToolOutputError::MissingRequired {
                    tool: call.name.clone(),
                    key: key.clone(),
                });
            }
        }

        for (key, value) in &args_obj {
            let Some(prop_schema) = properties.get(key) else {
                return Err(ToolOutputError::UnknownArgument {
                    tool: call.name.clone(),
                    key: key.clone(),
                });
            };
            if !value_matches_type(value, prop_schema) {
                return Err(ToolOutputError::WrongType {
                    tool: call.name.clone(),
                    key: key.clone(),
                });
            }
        }
    }
    Ok(())
}

fn value_matches_type(value: &Value, prop_schema: &Value) -> bool {
    let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else {
        return true;
    };
    match expected {
        "string" => value.is_string(),
        "object" => value.is_object(),
        "array" => {
            let Value::Array(items) = value else {
                return false;
            };
            let item_type = prop_schema
                .get("items")
                .and_then(|i| i.get("type"))
                .and_then(Value::as_str);
            let min_items = prop_schema.get("minItems").and_then(Value::as_u64).unwrap_or(0);
            if (items.len() as u64) < min_items {
                return false;
            }
            if item_type == Some("string") {
                items.iter().all(Value::is_string)
            } else {
                true
            }
        }
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        _ => true,
    }
}

/// Dotted tool-name canonicalization (opt-in via `RCC_CANONICALIZE_DOTTED_TOOL_NAMES`):
/// splits `"{prefix}.{base}"` for the configured whitelist of base names into
/// `base` plus a synthesized `{"server": prefix}` merged into the arguments.
pub fn canonicalize_dotted_tool_name(
    name: &str,
    arguments: &str,
    whitelist: &[&str],
) -> Option<(String, String)> {
    let (prefix, base) = name.split_once('.')?;
    if !whitelist.contains(&base) {
        return None;
    }
    let mut args: Value = serde_json::from_str(arguments).ok()?;
    if let Some(obj) = args.as_object_mut() {
        obj.insert("server".to_string(), Value::String(prefix.to_string()));
    }
    Some((base.to_string(), args.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_schema::canonical::CanonicalToolCall;
    use serde_json::json;

    #[test]
    fn normalize_base_url_strips_trailing_segments_and_is_idempotent() {
        let normalized = normalize_base_url("https://example.com//v1//chat/completions/");
        let twice = normalize_base_url(&normalized);
        assert_eq!(normalized, twice);
    }

    #[test]
    fn normalize_base_url_adds_v1_for_openai() {
        assert_eq!(normalize_base_url("https://api.openai.com"), "https://api.openai.com/v1");
    }

    #[test]
    fn normalize_base_url_strips_v1_for_bigmodel() {
        assert_eq!(
            normalize_base_url("https://open.bigmodel.cn/v1"),
            "https://open.bigmodel.cn"
        );
    }

    #[test]
    fn compact_messages_matches_s3_scenario() {
        let mut assistant_ab = CanonicalMessage::text(CanonicalRole::Assistant, "");
        assistant_ab.content = None;
        assistant_ab.tool_calls = vec![
            CanonicalToolCall { id: "A".into(), name: "f".into(), arguments: "{}".into() },
            CanonicalToolCall { id: "B".into(), name: "g".into(), arguments: "{}".into() },
        ];
        let mut assistant_c = CanonicalMessage::text(CanonicalRole::Assistant, "");
        assistant_c.content = None;
        assistant_c.tool_calls = vec![CanonicalToolCall { id: "C".into(), name: "h".into(), arguments: "{}".into() }];

        let mut tool_a1 = CanonicalMessage::text(CanonicalRole::Tool, "x");
        tool_a1.tool_call_id = Some("A".into());
        let mut tool_a2 = CanonicalMessage::text(CanonicalRole::Tool, "y");
        tool_a2.tool_call_id = Some("A".into());
        let mut tool_c = CanonicalMessage::text(CanonicalRole::Tool, "z");
        tool_c.tool_call_id = Some("C".into());

        let messages = vec![
            CanonicalMessage::text(CanonicalRole::User, "hi"),
            assistant_ab,
            assistant_c,
            tool_a1,
            tool_a2,
            tool_c,
        ];

        let compacted = compact_messages(messages);
        assert_eq!(compacted.len(), 4);
        assert_eq!(compacted[1].tool_calls.len(), 3);
        assert_eq!(compacted[2].content.as_deref(), Some("x\ny"));
        assert_eq!(compacted[3].content.as_deref(), Some("z"));
    }

    #[test]
    fn validate_tool_calls_rejects_unknown_tool() {
        let mut message = CanonicalMessage::text(CanonicalRole::Assistant, "");
        message.tool_calls = vec![CanonicalToolCall { id: "A".into(), name: "missing".into(), arguments: "{}".into() }];
        let err = validate_tool_calls(&message, &[]).unwrap_err();
        assert!(matches!(err, ToolOutputError::UnknownTool(_)));
    }

    #[test]
    fn validate_tool_calls_rejects_missing_required_key() {
        let mut message = CanonicalMessage::text(CanonicalRole::Assistant, "");
        message.tool_calls = vec![CanonicalToolCall { id: "A".into(), name: "f".into(), arguments: "{}".into() }];
        let tools = vec![CanonicalToolDecl {
            name: "f".into(),
            description: None,
            parameters: json!({"properties": {"x": {"type": "string"}}, "required": ["x"]}),
        }];
        let err = validate_tool_calls(&message, &tools).unwrap_err();
        assert!(matches!(err, ToolOutputError::MissingRequired { .. }));
    }

    #[test]
    fn canonicalize_dotted_tool_name_splits_and_merges_server() {
        let (base, args) =
            canonicalize_dotted_tool_name("mcp.search", r#"{"q":"rust"}"#, &["search"]).unwrap();
        assert_eq!(base, "search");
        let parsed: Value = serde_json::from_str(&args).unwrap();
        assert_eq!(parsed["server"], "mcp");
        assert_eq!(parsed["q"], "rust");
    }
}
