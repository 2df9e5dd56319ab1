//! Canonical request/message representation that C8 (the protocol translator)
//! converts every supported wire protocol through.
//!
//! Rather than one converter per ordered pair of protocols, each protocol
//! implements `From`/`TryFrom` into and out of this hub. Translating vendor A
//! to vendor B is `B::from(Canonical::from(a))`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A chat role, vendor-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One invocation of a tool requested by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON-encoded arguments, exactly as the model produced them.
    pub arguments: String,
}

/// A single message in canonical form.
///
/// `content` is kept as a string; vendors whose wire format uses a parts
/// array (Gemini) or content blocks (Anthropic) flatten to/from this on
/// translation. Multimodal parts that don't reduce to text are preserved
/// verbatim in `extra_content_blocks` so lossless vendor-to-vendor
/// round-trips of the common case never need to touch it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<CanonicalToolCall>,
    /// Present on `Tool` messages: which tool_call this responds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Present on `Tool` messages in some vendors; the function name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Non-text content blocks (images, etc.) preserved verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_content_blocks: Vec<Value>,
}

impl CanonicalMessage {
    pub fn text(role: CanonicalRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            extra_content_blocks: Vec::new(),
        }
    }
}

/// Declared tool/function schema, vendor-agnostic (`name` + JSON Schema
/// `parameters`). See [`crate::canonical::ToolSchema`] usage in the
/// compatibility shaper for strict output validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalToolDecl {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parameters: Value,
}

/// A full chat request in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    /// System prompt, already merged from any system/developer messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<CanonicalMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<CanonicalToolDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Fields no converter recognized; preserved so a loss-free vendor
    /// round-trip doesn't silently drop vendor extensions.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Token usage, normalized from whichever of the two common shapes
/// (`prompt_tokens`/`completion_tokens` or `input_tokens`/`output_tokens`)
/// the upstream used.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CanonicalUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl CanonicalUsage {
    pub fn from_json(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        let get = |keys: &[&str]| -> u64 {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_u64))
                .unwrap_or(0)
        };
        let prompt = get(&["prompt_tokens", "input_tokens"]);
        let completion = get(&["completion_tokens", "output_tokens"]);
        let total = get(&["total_tokens"]);
        Some(Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: if total > 0 { total } else { prompt + completion },
        })
    }
}

/// Why generation stopped, vendor-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalFinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

/// A full chat response in canonical form (single assistant turn).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub model: String,
    pub message: CanonicalMessage,
    pub finish_reason: CanonicalFinishReason,
    #[serde(default)]
    pub usage: CanonicalUsage,
}

/// One incremental delta of a streamed response, as produced by C9/C14.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<CanonicalRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_deltas: Vec<CanonicalToolCallDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<CanonicalFinishReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments_delta: Option<String>,
}
