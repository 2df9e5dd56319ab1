//! SSE Bridge (C14): turns pipeline output into the two client-facing SSE
//! flavors — OpenAI-chunk and Anthropic message-event — with pre-heartbeat
//! and heartbeat tickers running concurrently with the upstream consumer
//! (§4.14).

use crate::error::ProviderError;
use crate::workflow::WorkflowOutput;
use axum::response::sse::Event;
use futures::stream::BoxStream;
use futures::StreamExt;
use gateway_schema::anthropic::{AnthropicContentBlock, AnthropicMessageResponse};
use gateway_schema::canonical::{CanonicalDelta, CanonicalFinishReason};
use gateway_schema::openai_chat::OpenAiChatChunk;
use regex::Regex;
use std::convert::Infallible;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMode {
    Comment,
    Chunk,
}

pub fn parse_heartbeat_mode(raw: &str) -> HeartbeatMode {
    match raw {
        "chunk" => HeartbeatMode::Chunk,
        _ => HeartbeatMode::Comment,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SseTiming {
    pub heartbeat_ms: u64,
    pub pre_heartbeat_delay_ms: u64,
    pub pre_heartbeat_interval_ms: u64,
}

static THINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex"));

/// Strips private `<think>…</think>` markers from streamed content (§4.14 step 6).
pub fn strip_think_tags(text: &str) -> String {
    THINK_TAG.replace_all(text, "").into_owned()
}

fn comment_event(text: String) -> Event {
    Event::default().comment(text)
}

fn json_event(value: &impl serde::Serialize) -> Event {
    Event::default().json_data(value).unwrap_or_else(|_| Event::default().data("{}"))
}

fn typed_event(name: &'static str, value: impl serde::Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(value)
        .unwrap_or_else(|_| Event::default().event(name).data("{}"))
}

/// Builds the OpenAI-chunk SSE stream channel-fed by a background task so the
/// heartbeat ticker and the upstream consumer can run concurrently (§4.14).
pub fn openai_chunk_sse(
    id: String,
    model: String,
    created: i64,
    deltas: BoxStream<'static, Result<CanonicalDelta, ProviderError>>,
    timing: SseTiming,
    mode: HeartbeatMode,
) -> ReceiverStream<Result<Event, Infallible>> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        run_openai_chunk_producer(tx, id, model, created, deltas, timing, mode).await;
    });

    ReceiverStream::new(rx)
}

async fn run_openai_chunk_producer(
    tx: mpsc::Sender<Result<Event, Infallible>>,
    id: String,
    model: String,
    created: i64,
    mut deltas: BoxStream<'static, Result<CanonicalDelta, ProviderError>>,
    timing: SseTiming,
    mode: HeartbeatMode,
) {
    // Pre-heartbeat: ticks before the first delta arrives, stoppable at any time.
    let pre_delay = tokio::time::sleep(Duration::from_millis(timing.pre_heartbeat_delay_ms));
    tokio::pin!(pre_delay);
    let mut pre_tick = 0u64;
    let mut first_delta = None;

    loop {
        tokio::select! {
            biased;
            next = deltas.next() => {
                first_delta = next;
                break;
            }
            _ = &mut pre_delay => {
                pre_tick += 1;
                if tx.send(Ok(comment_event(format!("pre-ping {pre_tick}")))).await.is_err() {
                    return;
                }
                pre_delay.as_mut().reset(tokio::time::Instant::now() + Duration::from_millis(timing.pre_heartbeat_interval_ms));
            }
        }
    }
    if pre_tick > 0 {
        let stamp = chrono::Utc::now().timestamp_millis();
        let _ = tx.send(Ok(comment_event(format!("pre-stop {stamp}")))).await;
    }

    let role_chunk = OpenAiChatChunk::from_delta(
        id.clone(),
        created,
        model.clone(),
        &CanonicalDelta {
            role: Some(gateway_schema::canonical::CanonicalRole::Assistant),
            content: None,
            tool_call_deltas: Vec::new(),
            finish_reason: None,
        },
    );
    if tx.send(Ok(json_event(&role_chunk))).await.is_err() {
        return;
    }

    let mut any_tool_calls = false;
    let mut heartbeat = tokio::time::interval(Duration::from_millis(timing.heartbeat_ms.max(1)));
    heartbeat.reset();

    let mut pending = first_delta;
    loop {
        let delta = match pending.take() {
            Some(d) => Some(d),
            None => {
                tokio::select! {
                    biased;
                    next = deltas.next() => next,
                    _ = heartbeat.tick() => {
                        let event = match mode {
                            HeartbeatMode::Comment => comment_event("heartbeat".to_string()),
                            HeartbeatMode::Chunk => {
                                let chunk = OpenAiChatChunk::heartbeat(id.clone(), created, model.clone());
                                json_event(&chunk)
                            }
                        };
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                        continue;
                    }
                }
            }
        };

        let Some(delta) = delta else { break };
        let mut delta = match delta {
            Ok(d) => d,
            Err(e) => {
                let event = Event::default().event("error").data(e.message);
                let _ = tx.send(Ok(event)).await;
                let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
                return;
            }
        };

        if !delta.tool_call_deltas.is_empty() {
            any_tool_calls = true;
        }
        if let Some(content) = delta.content.take() {
            delta.content = Some(strip_think_tags(&content));
        }

        let chunk = OpenAiChatChunk::from_delta(id.clone(), created, model.clone(), &delta);
        if tx.send(Ok(json_event(&chunk))).await.is_err() {
            return;
        }
    }

    let finish_reason = if any_tool_calls {
        CanonicalFinishReason::ToolCalls
    } else {
        CanonicalFinishReason::Stop
    };
    let terminal = OpenAiChatChunk::from_delta(
        id,
        created,
        model,
        &CanonicalDelta {
            role: None,
            content: None,
            tool_call_deltas: Vec::new(),
            finish_reason: Some(finish_reason),
        },
    );
    if tx.send(Ok(json_event(&terminal))).await.is_err() {
        return;
    }
    let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
}

/// Builds the Anthropic message-event SSE stream (§4.14). Collapses a single
/// (non-stream) response and a provider-delta stream into the same event
/// sequence (S4).
pub fn anthropic_message_sse(
    model: String,
    output: WorkflowOutput,
    heartbeat_ms: u64,
) -> ReceiverStream<Result<Event, Infallible>> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        match output {
            WorkflowOutput::Single(response) => {
                run_anthropic_single_producer(tx, response).await;
            }
            WorkflowOutput::Stream(deltas) => {
                run_anthropic_stream_producer(tx, model, deltas, heartbeat_ms).await;
            }
        }
    });

    ReceiverStream::new(rx)
}

async fn run_anthropic_single_producer(
    tx: mpsc::Sender<Result<Event, Infallible>>,
    response: gateway_schema::canonical::CanonicalResponse,
) {
    let message = AnthropicMessageResponse::from_canonical(response);
    let start = serde_json::json!({"type":"message_start","message":message});
    if tx.send(Ok(typed_event("message_start", start))).await.is_err() {
        return;
    }

    for (index, block) in message.content.iter().enumerate() {
        let start = serde_json::json!({"type":"content_block_start","index":index,"content_block":block});
        if tx.send(Ok(typed_event("content_block_start", start))).await.is_err() {
            return;
        }
        if let AnthropicContentBlock::Text { text } = block {
            let delta = serde_json::json!({"type":"content_block_delta","index":index,"delta":{"type":"text_delta","text":text}});
            if tx.send(Ok(typed_event("content_block_delta", delta))).await.is_err() {
                return;
            }
        }
        let stop = serde_json::json!({"type":"content_block_stop","index":index});
        if tx.send(Ok(typed_event("content_block_stop", stop))).await.is_err() {
            return;
        }
    }

    let delta = serde_json::json!({"type":"message_delta","delta":{"stop_reason":message.stop_reason}});
    if tx.send(Ok(typed_event("message_delta", delta))).await.is_err() {
        return;
    }
    let stop_event = serde_json::json!({"type":"message_stop"});
    let _ = tx.send(Ok(typed_event("message_stop", stop_event))).await;
    let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
}

async fn run_anthropic_stream_producer(
    tx: mpsc::Sender<Result<Event, Infallible>>,
    model: String,
    mut deltas: BoxStream<'static, Result<CanonicalDelta, ProviderError>>,
    heartbeat_ms: u64,
) {
    let message_id = format!("msg_{}", Uuid::new_v4().simple());
    let start = serde_json::json!({
        "type": "message_start",
        "message": {"id": message_id, "type": "message", "role": "assistant", "model": model, "content": []}
    });
    if tx.send(Ok(typed_event("message_start", start))).await.is_err() {
        return;
    }

    let mut block_open = false;
    let mut sequence = 0u64;
    let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms.max(1)));
    heartbeat.reset();
    let mut stop_reason = "end_turn";

    loop {
        tokio::select! {
            biased;
            next = deltas.next() => {
                let Some(delta) = next else { break };
                let delta = match delta {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = tx.send(Ok(Event::default().event("error").data(e.message))).await;
                        let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
                        return;
                    }
                };

                if let Some(content) = &delta.content {
                    if !block_open {
                        let block_start = serde_json::json!({"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}});
                        if tx.send(Ok(typed_event("content_block_start", block_start))).await.is_err() {
                            return;
                        }
                        block_open = true;
                    }
                    let text = strip_think_tags(content);
                    let delta_event = serde_json::json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":text}});
                    if tx.send(Ok(typed_event("content_block_delta", delta_event))).await.is_err() {
                        return;
                    }
                }

                if let Some(reason) = delta.finish_reason {
                    stop_reason = match reason {
                        CanonicalFinishReason::ToolCalls => "tool_use",
                        CanonicalFinishReason::Length => "max_tokens",
                        _ => "end_turn",
                    };
                }
            }
            _ = heartbeat.tick() => {
                sequence += 1;
                let ping = serde_json::json!({"type":"ping","sequence":sequence});
                if tx.send(Ok(typed_event("ping", ping))).await.is_err() {
                    return;
                }
                continue;
            }
        }
    }

    if block_open {
        let stop = serde_json::json!({"type":"content_block_stop","index":0});
        if tx.send(Ok(typed_event("content_block_stop", stop))).await.is_err() {
            return;
        }
    }

    let delta = serde_json::json!({"type":"message_delta","delta":{"stop_reason":stop_reason}});
    if tx.send(Ok(typed_event("message_delta", delta))).await.is_err() {
        return;
    }
    let stop_event = serde_json::json!({"type":"message_stop"});
    let _ = tx.send(Ok(typed_event("message_stop", stop_event))).await;
    let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_think_tags_removes_private_reasoning() {
        let input = "before <think>secret plan</think> after";
        assert_eq!(strip_think_tags(input), "before  after");
    }

    #[test]
    fn heartbeat_mode_defaults_to_comment() {
        assert_eq!(parse_heartbeat_mode("anything-else"), HeartbeatMode::Comment);
        assert_eq!(parse_heartbeat_mode("chunk"), HeartbeatMode::Chunk);
    }

    #[test]
    fn chunk_mode_heartbeat_is_flagged_and_never_carries_finish_reason() {
        let chunk = OpenAiChatChunk::heartbeat("id".into(), 0, "model".into());
        assert!(chunk.is_heartbeat());
        assert!(chunk.choices[0].finish_reason.is_none());
    }
}
