//! OpenAI `/v1/chat/completions` wire types and their canonical conversion.

use crate::canonical::{
    CanonicalDelta, CanonicalFinishReason, CanonicalMessage, CanonicalRequest, CanonicalResponse,
    CanonicalRole, CanonicalToolCall, CanonicalToolCallDelta, CanonicalToolDecl, CanonicalUsage,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiToolDecl>>,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolDecl {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunctionDecl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionDecl {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAiChatChoice>,
    pub usage: OpenAiUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatChoice {
    pub index: u32,
    pub message: OpenAiChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAiChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChunkChoice {
    pub index: u32,
    pub delta: OpenAiChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCallDelta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<OpenAiFunctionCallDelta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Stringify a `content` field that may be a plain string or a parts array,
/// per §4.8's requirement that tool-role content normalization happens here.
fn content_to_text(content: &Option<Value>) -> Option<String> {
    match content {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) => None,
        Some(other) => Some(other.to_string()),
    }
}

impl From<OpenAiChatRequest> for CanonicalRequest {
    fn from(req: OpenAiChatRequest) -> Self {
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();

        for m in req.messages {
            let role = match m.role.as_str() {
                "system" | "developer" => {
                    if let Some(text) = content_to_text(&m.content) {
                        system_parts.push(text);
                    }
                    continue;
                }
                "assistant" => CanonicalRole::Assistant,
                "tool" => CanonicalRole::Tool,
                _ => CanonicalRole::User,
            };

            let tool_calls = m
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| CanonicalToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect();

            messages.push(CanonicalMessage {
                role,
                content: content_to_text(&m.content),
                tool_calls,
                tool_call_id: m.tool_call_id,
                name: m.name,
                extra_content_blocks: Vec::new(),
            });
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        };

        let tools = req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|t| CanonicalToolDecl {
                name: t.function.name,
                description: t.function.description,
                parameters: t.function.parameters,
            })
            .collect();

        let stop = match req.stop {
            Some(Value::String(s)) => vec![s],
            Some(Value::Array(a)) => a
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        CanonicalRequest {
            model: req.model,
            system,
            messages,
            tools,
            tool_choice: req.tool_choice,
            stream: req.stream,
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            stop,
            extra: req.extra,
        }
    }
}

impl From<CanonicalRequest> for OpenAiChatRequest {
    fn from(req: CanonicalRequest) -> Self {
        let mut messages = Vec::new();
        if let Some(system) = req.system {
            messages.push(OpenAiChatMessage {
                role: "system".to_string(),
                content: Some(Value::String(system)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
        for m in req.messages {
            let role = match m.role {
                CanonicalRole::System => "system",
                CanonicalRole::User => "user",
                CanonicalRole::Assistant => "assistant",
                CanonicalRole::Tool => "tool",
            }
            .to_string();

            let tool_calls = if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .into_iter()
                        .map(|tc| OpenAiToolCall {
                            id: tc.id,
                            kind: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: tc.name,
                                arguments: tc.arguments,
                            },
                        })
                        .collect(),
                )
            };

            messages.push(OpenAiChatMessage {
                role,
                content: m.content.map(Value::String),
                tool_calls,
                tool_call_id: m.tool_call_id,
                name: m.name,
            });
        }

        let tools = if req.tools.is_empty() {
            None
        } else {
            Some(
                req.tools
                    .into_iter()
                    .map(|t| OpenAiToolDecl {
                        kind: "function".to_string(),
                        function: OpenAiFunctionDecl {
                            name: t.name,
                            description: t.description,
                            parameters: t.parameters,
                        },
                    })
                    .collect(),
            )
        };

        let stop = if req.stop.is_empty() {
            None
        } else {
            Some(json!(req.stop))
        };

        OpenAiChatRequest {
            model: req.model,
            messages,
            tools,
            tool_choice: req.tool_choice,
            stream: req.stream,
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            stop,
            extra: req.extra,
        }
    }
}

impl From<CanonicalUsage> for OpenAiUsage {
    fn from(u: CanonicalUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

fn finish_reason_to_str(r: CanonicalFinishReason) -> &'static str {
    match r {
        CanonicalFinishReason::Stop => "stop",
        CanonicalFinishReason::ToolCalls => "tool_calls",
        CanonicalFinishReason::Length => "length",
        CanonicalFinishReason::ContentFilter => "content_filter",
    }
}

fn finish_reason_from_str(s: &str) -> CanonicalFinishReason {
    match s {
        "tool_calls" => CanonicalFinishReason::ToolCalls,
        "length" => CanonicalFinishReason::Length,
        "content_filter" => CanonicalFinishReason::ContentFilter,
        _ => CanonicalFinishReason::Stop,
    }
}

impl OpenAiChatCompletion {
    pub fn from_canonical(id: String, created: i64, resp: CanonicalResponse) -> Self {
        let m = resp.message;
        let tool_calls = if m.tool_calls.is_empty() {
            None
        } else {
            Some(
                m.tool_calls
                    .into_iter()
                    .map(|tc| OpenAiToolCall {
                        id: tc.id,
                        kind: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: tc.name,
                            arguments: tc.arguments,
                        },
                    })
                    .collect(),
            )
        };

        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model: resp.model,
            choices: vec![OpenAiChatChoice {
                index: 0,
                message: OpenAiChatMessage {
                    role: "assistant".to_string(),
                    content: m.content.map(Value::String),
                    tool_calls,
                    tool_call_id: None,
                    name: None,
                },
                finish_reason: Some(finish_reason_to_str(resp.finish_reason).to_string()),
            }],
            usage: resp.usage.into(),
        }
    }
}

impl CanonicalResponse {
    pub fn from_openai(resp: OpenAiChatCompletion) -> Option<Self> {
        let choice = resp.choices.into_iter().next()?;
        let finish_reason = choice
            .finish_reason
            .as_deref()
            .map(finish_reason_from_str)
            .unwrap_or(CanonicalFinishReason::Stop);
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| CanonicalToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();
        Some(Self {
            model: resp.model,
            message: CanonicalMessage {
                role: CanonicalRole::Assistant,
                content: content_to_text(&choice.message.content),
                tool_calls,
                tool_call_id: None,
                name: None,
                extra_content_blocks: Vec::new(),
            },
            finish_reason,
            usage: CanonicalUsage {
                prompt_tokens: resp.usage.prompt_tokens,
                completion_tokens: resp.usage.completion_tokens,
                total_tokens: resp.usage.total_tokens,
            },
        })
    }
}

impl OpenAiChatChunk {
    pub fn from_delta(id: String, created: i64, model: String, delta: &CanonicalDelta) -> Self {
        let tool_calls = if delta.tool_call_deltas.is_empty() {
            None
        } else {
            Some(
                delta
                    .tool_call_deltas
                    .iter()
                    .map(|d| OpenAiToolCallDelta {
                        index: d.index,
                        id: d.id.clone(),
                        function: Some(OpenAiFunctionCallDelta {
                            name: d.name.clone(),
                            arguments: d.arguments_delta.clone(),
                        }),
                    })
                    .collect(),
            )
        };

        Self {
            id,
            object: "chat.completion.chunk".to_string(),
            created,
            model,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiChunkDelta {
                    role: delta.role.map(|r| match r {
                        CanonicalRole::Assistant => "assistant".to_string(),
                        CanonicalRole::User => "user".to_string(),
                        CanonicalRole::System => "system".to_string(),
                        CanonicalRole::Tool => "tool".to_string(),
                    }),
                    content: delta.content.clone(),
                    reasoning_content: None,
                    tool_calls,
                    metadata: None,
                },
                finish_reason: delta.finish_reason.map(finish_reason_to_str).map(str::to_string),
            }],
        }
    }

    /// A heartbeat chunk carrying no visible content, tagged so downstream
    /// normalization can filter it out (invariant I7).
    pub fn heartbeat(id: String, created: i64, model: String) -> Self {
        Self {
            id,
            object: "chat.completion.chunk".to_string(),
            created,
            model,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiChunkDelta {
                    role: None,
                    content: None,
                    reasoning_content: Some(String::new()),
                    tool_calls: None,
                    metadata: Some(json!({"rccHeartbeat": true})),
                },
                finish_reason: None,
            }],
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.choices.first().is_some_and(|c| {
            c.delta
                .metadata
                .as_ref()
                .and_then(|m| m.get("rccHeartbeat"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })
    }
}
