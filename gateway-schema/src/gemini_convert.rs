//! Canonical conversion for the Gemini `generateContent` wire format.

use crate::canonical::{
    CanonicalFinishReason, CanonicalMessage, CanonicalRequest, CanonicalResponse, CanonicalRole,
    CanonicalToolCall, CanonicalToolDecl, CanonicalUsage,
};
use crate::gemini::{Content, GeminiGenerateContentRequest, GeminiResponseBody, Part, Tool};
use serde_json::{Value, json};

fn part_to_text_and_calls(part: &Part) -> (Option<String>, Option<CanonicalToolCall>, Option<String>) {
    if let Some(text) = &part.text {
        return (Some(text.clone()), None, None);
    }
    if let Some(call) = &part.function_call {
        let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
        let args = call
            .get("args")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));
        let id = call
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("call_{name}"));
        return (
            None,
            Some(CanonicalToolCall {
                id,
                name: name.to_string(),
                arguments: args.to_string(),
            }),
            None,
        );
    }
    if let Some(resp) = &part.function_response {
        let name = resp.get("name").and_then(Value::as_str).unwrap_or_default();
        let content = resp
            .get("response")
            .map(|v| v.to_string())
            .unwrap_or_default();
        return (None, None, Some(format!("{name}:{content}")));
    }
    (None, None, None)
}

impl From<GeminiGenerateContentRequest> for CanonicalRequest {
    fn from(req: GeminiGenerateContentRequest) -> Self {
        let system = req.system_instruction.as_ref().and_then(|c| {
            let texts: Vec<String> = c.parts.iter().filter_map(|p| p.text.clone()).collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        });

        let mut messages = Vec::new();
        for content in req.contents {
            let role = match content.role.as_deref() {
                Some("model") => CanonicalRole::Assistant,
                _ => CanonicalRole::User,
            };

            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();
            let mut tool_response_text = None;

            for part in &content.parts {
                let (text, call, tool_resp) = part_to_text_and_calls(part);
                if let Some(t) = text {
                    text_parts.push(t);
                }
                if let Some(c) = call {
                    tool_calls.push(c);
                }
                if let Some(t) = tool_resp {
                    tool_response_text = Some(t);
                }
            }

            if let Some(tool_text) = tool_response_text {
                messages.push(CanonicalMessage {
                    role: CanonicalRole::Tool,
                    content: Some(tool_text),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                    name: None,
                    extra_content_blocks: Vec::new(),
                });
                continue;
            }

            messages.push(CanonicalMessage {
                role,
                content: if text_parts.is_empty() {
                    None
                } else {
                    Some(text_parts.join("\n"))
                },
                tool_calls,
                tool_call_id: None,
                name: None,
                extra_content_blocks: Vec::new(),
            });
        }

        let tools = req
            .tools
            .unwrap_or_default()
            .into_iter()
            .flat_map(|t| t.function_declarations.unwrap_or_default())
            .map(|fd| CanonicalToolDecl {
                name: fd.name,
                description: Some(fd.description),
                parameters: fd
                    .parameters_json_schema
                    .or(fd.parameters)
                    .unwrap_or(json!({"type": "object"})),
            })
            .collect();

        CanonicalRequest {
            model: String::new(),
            system,
            messages,
            tools,
            tool_choice: None,
            stream: false,
            temperature: req.generation_config.as_ref().and_then(|g| g.temperature),
            top_p: req.generation_config.as_ref().and_then(|g| g.top_p),
            max_tokens: req
                .generation_config
                .as_ref()
                .and_then(|g| g.max_output_tokens),
            stop: Vec::new(),
            extra: req.extra,
        }
    }
}

impl From<CanonicalRequest> for GeminiGenerateContentRequest {
    fn from(req: CanonicalRequest) -> Self {
        let system_instruction = req.system.map(|s| Content {
            role: None,
            parts: vec![Part {
                text: Some(s),
                ..Default::default()
            }],
            extra: Default::default(),
        });

        let mut contents = Vec::new();
        for m in req.messages {
            let role = match m.role {
                CanonicalRole::Assistant => "model",
                _ => "user",
            };

            if m.role == CanonicalRole::Tool {
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part {
                        function_response: Some(json!({
                            "name": m.name.unwrap_or_default(),
                            "response": {"content": m.content.unwrap_or_default()},
                        })),
                        ..Default::default()
                    }],
                    extra: Default::default(),
                });
                continue;
            }

            let mut parts = Vec::new();
            if let Some(text) = &m.content {
                if !text.is_empty() {
                    parts.push(Part {
                        text: Some(text.clone()),
                        ..Default::default()
                    });
                }
            }
            for tc in &m.tool_calls {
                let args = serde_json::from_str(&tc.arguments).unwrap_or(Value::Null);
                parts.push(Part {
                    function_call: Some(json!({"name": tc.name, "args": args})),
                    ..Default::default()
                });
            }

            contents.push(Content {
                role: Some(role.to_string()),
                parts,
                extra: Default::default(),
            });
        }

        let tools = if req.tools.is_empty() {
            None
        } else {
            Some(vec![Tool {
                function_declarations: Some(
                    req.tools
                        .into_iter()
                        .map(|t| crate::gemini::FunctionDeclaration {
                            name: t.name,
                            description: t.description.unwrap_or_default(),
                            behavior: None,
                            parameters: None,
                            parameters_json_schema: Some(t.parameters),
                            response: None,
                            response_json_schema: None,
                            extra: Default::default(),
                        })
                        .collect(),
                ),
                extra: Default::default(),
            }])
        };

        GeminiGenerateContentRequest {
            contents,
            system_instruction,
            generation_config: None,
            tools,
            tool_config: None,
            extra: req.extra,
        }
    }
}

impl CanonicalResponse {
    pub fn from_gemini(body: GeminiResponseBody, model: String) -> Option<Self> {
        let candidate = body.candidates.into_iter().next()?;
        let content = candidate.content?;

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for part in &content.parts {
            let (text, call, _) = part_to_text_and_calls(part);
            if let Some(t) = text {
                text_parts.push(t);
            }
            if let Some(c) = call {
                tool_calls.push(c);
            }
        }

        let finish_reason = if !tool_calls.is_empty() {
            CanonicalFinishReason::ToolCalls
        } else {
            match candidate.finish_reason.as_deref() {
                Some("MAX_TOKENS") => CanonicalFinishReason::Length,
                Some("SAFETY") | Some("RECITATION") => CanonicalFinishReason::ContentFilter,
                _ => CanonicalFinishReason::Stop,
            }
        };

        let usage = body
            .usageMetadata
            .as_ref()
            .and_then(|u| {
                let prompt = u.get("promptTokenCount").and_then(Value::as_u64)?;
                let completion = u.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0);
                let total = u.get("totalTokenCount").and_then(Value::as_u64).unwrap_or(prompt + completion);
                Some(CanonicalUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: total,
                })
            })
            .unwrap_or_default();

        Some(CanonicalResponse {
            model,
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
            usage,
        })
    }
}
