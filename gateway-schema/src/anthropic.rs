//! Anthropic `/v1/messages` wire types and their canonical conversion.

use crate::canonical::{
    CanonicalFinishReason, CanonicalMessage, CanonicalRequest, CanonicalResponse, CanonicalRole,
    CanonicalToolCall, CanonicalToolDecl, CanonicalUsage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicContent,
}

/// Anthropic message content is either a bare string or a list of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicToolDecl {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicToolDecl>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessageResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<AnthropicContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: AnthropicUsage,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

fn system_to_text(system: &Option<Value>) -> Option<String> {
    match system {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(blocks)) => {
            let joined: Vec<String> = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined.join("\n"))
            }
        }
        Some(other) => Some(other.to_string()),
    }
}

fn content_to_canonical(content: AnthropicContent) -> (Option<String>, Vec<CanonicalToolCall>, Vec<Value>) {
    match content {
        AnthropicContent::Text(s) => (Some(s), Vec::new(), Vec::new()),
        AnthropicContent::Blocks(blocks) => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();
            let mut extra = Vec::new();
            for block in blocks {
                match block {
                    AnthropicContentBlock::Text { text } => text_parts.push(text),
                    AnthropicContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(CanonicalToolCall {
                            id,
                            name,
                            arguments: input.to_string(),
                        });
                    }
                    AnthropicContentBlock::ToolResult { content, .. } => {
                        let text = match &content {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        text_parts.push(text);
                    }
                }
            }
            let text = if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join("\n"))
            };
            (text, tool_calls, extra)
        }
    }
}

impl From<AnthropicRequest> for CanonicalRequest {
    fn from(req: AnthropicRequest) -> Self {
        let system = system_to_text(&req.system);
        let mut messages = Vec::new();

        for m in req.messages {
            let role = match m.role.as_str() {
                "assistant" => CanonicalRole::Assistant,
                _ => CanonicalRole::User,
            };

            // A user message whose only blocks are tool_result(s) becomes one
            // canonical Tool message per block (Anthropic nests tool results
            // inside user turns; OpenAI/canonical give them their own role).
            if let AnthropicContent::Blocks(blocks) = &m.content {
                let all_tool_results = !blocks.is_empty()
                    && blocks
                        .iter()
                        .all(|b| matches!(b, AnthropicContentBlock::ToolResult { .. }));
                if all_tool_results && role == CanonicalRole::User {
                    for block in blocks {
                        if let AnthropicContentBlock::ToolResult {
                            tool_use_id,
                            content,
                        } = block
                        {
                            let text = match content {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            messages.push(CanonicalMessage {
                                role: CanonicalRole::Tool,
                                content: Some(text),
                                tool_calls: Vec::new(),
                                tool_call_id: Some(tool_use_id.clone()),
                                name: None,
                                extra_content_blocks: Vec::new(),
                            });
                        }
                    }
                    continue;
                }
            }

            let (content, tool_calls, extra_content_blocks) = content_to_canonical(m.content);
            messages.push(CanonicalMessage {
                role,
                content,
                tool_calls,
                tool_call_id: None,
                name: None,
                extra_content_blocks,
            });
        }

        let tools = req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|t| CanonicalToolDecl {
                name: t.name,
                description: t.description,
                parameters: t.input_schema,
            })
            .collect();

        CanonicalRequest {
            model: req.model,
            system,
            messages,
            tools,
            tool_choice: req.tool_choice,
            stream: req.stream,
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: Some(req.max_tokens),
            stop: req.stop_sequences,
            extra: req.extra,
        }
    }
}

impl From<CanonicalRequest> for AnthropicRequest {
    fn from(req: CanonicalRequest) -> Self {
        let mut messages = Vec::new();
        let mut idx = 0usize;
        while idx < req.messages.len() {
            let m = &req.messages[idx];
            if m.role == CanonicalRole::Tool {
                let mut blocks = Vec::new();
                while idx < req.messages.len() && req.messages[idx].role == CanonicalRole::Tool {
                    let tm = &req.messages[idx];
                    blocks.push(AnthropicContentBlock::ToolResult {
                        tool_use_id: tm.tool_call_id.clone().unwrap_or_default(),
                        content: tm
                            .content
                            .clone()
                            .map(Value::String)
                            .unwrap_or(Value::Null),
                    });
                    idx += 1;
                }
                messages.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: AnthropicContent::Blocks(blocks),
                });
                continue;
            }

            let role = match m.role {
                CanonicalRole::Assistant => "assistant",
                _ => "user",
            }
            .to_string();

            let mut blocks = Vec::new();
            if let Some(text) = &m.content {
                if !text.is_empty() {
                    blocks.push(AnthropicContentBlock::Text { text: text.clone() });
                }
            }
            for tc in &m.tool_calls {
                let input = serde_json::from_str(&tc.arguments).unwrap_or(Value::Null);
                blocks.push(AnthropicContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input,
                });
            }

            messages.push(AnthropicMessage {
                role,
                content: AnthropicContent::Blocks(blocks),
            });
            idx += 1;
        }

        let tools = if req.tools.is_empty() {
            None
        } else {
            Some(
                req.tools
                    .into_iter()
                    .map(|t| AnthropicToolDecl {
                        name: t.name,
                        description: t.description,
                        input_schema: t.parameters,
                    })
                    .collect(),
            )
        };

        AnthropicRequest {
            model: req.model,
            system: req.system.map(Value::String),
            messages,
            max_tokens: req.max_tokens.unwrap_or(4096),
            tools,
            tool_choice: req.tool_choice,
            stream: req.stream,
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop,
            extra: req.extra,
        }
    }
}

fn stop_reason_to_str(r: CanonicalFinishReason) -> &'static str {
    match r {
        CanonicalFinishReason::Stop => "end_turn",
        CanonicalFinishReason::ToolCalls => "tool_use",
        CanonicalFinishReason::Length => "max_tokens",
        CanonicalFinishReason::ContentFilter => "end_turn",
    }
}

fn stop_reason_from_str(s: &str) -> CanonicalFinishReason {
    match s {
        "tool_use" => CanonicalFinishReason::ToolCalls,
        "max_tokens" => CanonicalFinishReason::Length,
        _ => CanonicalFinishReason::Stop,
    }
}

impl AnthropicMessageResponse {
    pub fn from_canonical(resp: CanonicalResponse) -> Self {
        let mut content = Vec::new();
        if let Some(text) = &resp.message.content {
            if !text.is_empty() {
                content.push(AnthropicContentBlock::Text { text: text.clone() });
            }
        }
        for tc in &resp.message.tool_calls {
            let input = serde_json::from_str(&tc.arguments).unwrap_or(Value::Null);
            content.push(AnthropicContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.name.clone(),
                input,
            });
        }

        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            kind: "message".to_string(),
            role: "assistant".to_string(),
            content,
            model: resp.model,
            stop_reason: Some(stop_reason_to_str(resp.finish_reason).to_string()),
            usage: AnthropicUsage {
                input_tokens: resp.usage.prompt_tokens,
                output_tokens: resp.usage.completion_tokens,
            },
        }
    }
}

impl AnthropicMessageResponse {
    pub fn to_canonical(self) -> CanonicalResponse {
        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in self.content {
            match block {
                AnthropicContentBlock::Text { text } => text_parts.push(text),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(CanonicalToolCall {
                        id,
                        name,
                        arguments: input.to_string(),
                    });
                }
                AnthropicContentBlock::ToolResult { .. } => {}
            }
        }
        let finish_reason = self
            .stop_reason
            .as_deref()
            .map(stop_reason_from_str)
            .unwrap_or(CanonicalFinishReason::Stop);

        CanonicalResponse {
            model: self.model,
            message: CanonicalMessage {
                role: CanonicalRole::Assistant,
                content: if text_parts.is_empty() {
                    None
                } else {
                    Some(text_parts.join("\n"))
                },
                tool_calls,
                tool_call_id: None,
                name: None,
                extra_content_blocks: Vec::new(),
            },
            finish_reason,
            usage: CanonicalUsage {
                prompt_tokens: self.usage.input_tokens,
                completion_tokens: self.usage.output_tokens,
                total_tokens: self.usage.input_tokens + self.usage.output_tokens,
            },
        }
    }
}
