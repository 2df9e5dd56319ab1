//! Workflow (C9): coerces between streaming and non-streaming shapes when
//! the client's request and the chosen provider's capability disagree
//! (§4.9).

use futures::stream::{self, BoxStream, StreamExt};
use gateway_schema::canonical::{
    CanonicalDelta, CanonicalFinishReason, CanonicalMessage, CanonicalResponse, CanonicalRole,
    CanonicalToolCallDelta,
};

/// What a pipeline produces before C9 reshapes it to match the client's ask.
pub enum ProviderOutput {
    Single(CanonicalResponse),
    Stream(BoxStream<'static, Result<CanonicalDelta, crate::error::ProviderError>>),
}

/// What C9 hands to C14 after reshaping.
pub enum WorkflowOutput {
    Single(CanonicalResponse),
    Stream(BoxStream<'static, Result<CanonicalDelta, crate::error::ProviderError>>),
}

/// Reshapes `output` to honor `client_wants_stream`. A single response
/// requested as a stream is wrapped as a synthesized one-shot stream; a
/// provider stream requested as a single response is collected and
/// aggregated.
pub async fn coerce(
    output: ProviderOutput,
    client_wants_stream: bool,
) -> Result<WorkflowOutput, crate::error::ProviderError> {
    match (output, client_wants_stream) {
        (ProviderOutput::Single(response), false) => Ok(WorkflowOutput::Single(response)),
        (ProviderOutput::Stream(stream), true) => Ok(WorkflowOutput::Stream(stream)),
        (ProviderOutput::Single(response), true) => {
            Ok(WorkflowOutput::Stream(synthesize_single_block_stream(response)))
        }
        (ProviderOutput::Stream(stream), false) => {
            Ok(WorkflowOutput::Single(collect_stream(stream).await?))
        }
    }
}

fn synthesize_single_block_stream(
    response: CanonicalResponse,
) -> BoxStream<'static, Result<CanonicalDelta, crate::error::ProviderError>> {
    let tool_call_deltas = response
        .message
        .tool_calls
        .iter()
        .enumerate()
        .map(|(index, call)| CanonicalToolCallDelta {
            index,
            id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            arguments_delta: Some(call.arguments.clone()),
        })
        .collect::<Vec<_>>();

    let content_delta = CanonicalDelta {
        role: Some(CanonicalRole::Assistant),
        content: response.message.content.clone(),
        tool_call_deltas,
        finish_reason: None,
    };
    let terminal_delta = CanonicalDelta {
        role: None,
        content: None,
        tool_call_deltas: Vec::new(),
        finish_reason: Some(response.finish_reason),
    };

    stream::iter(vec![Ok(content_delta), Ok(terminal_delta)]).boxed()
}

/// Collects a stream of deltas into one aggregated response. Cancellation
/// (the stream ending early via an `Err`) propagates straight to C6's
/// cancellation handling by short-circuiting via `?`.
async fn collect_stream(
    mut stream: BoxStream<'static, Result<CanonicalDelta, crate::error::ProviderError>>,
) -> Result<CanonicalResponse, crate::error::ProviderError> {
    let mut content = String::new();
    let mut message = CanonicalMessage::text(CanonicalRole::Assistant, "");
    message.content = None;
    let mut finish_reason = CanonicalFinishReason::Stop;
    let mut model = String::new();

    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if let Some(piece) = delta.content {
            content.push_str(&piece);
        }
        for tool_delta in delta.tool_call_deltas {
            merge_tool_call_delta(&mut message, tool_delta);
        }
        if let Some(reason) = delta.finish_reason {
            finish_reason = reason;
        }
    }

    if !content.is_empty() {
        message.content = Some(content);
    }
    if model.is_empty() {
        model = "unknown".to_string();
    }

    Ok(CanonicalResponse { model, message, finish_reason, usage: Default::default() })
}

fn merge_tool_call_delta(message: &mut CanonicalMessage, delta: CanonicalToolCallDelta) {
    while message.tool_calls.len() <= delta.index {
        message.tool_calls.push(gateway_schema::canonical::CanonicalToolCall {
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
    }
    let call = &mut message.tool_calls[delta.index];
    if let Some(id) = delta.id {
        call.id = id;
    }
    if let Some(name) = delta.name {
        call.name = name;
    }
    if let Some(args) = delta.arguments_delta {
        call.arguments.push_str(&args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_response_as_stream_has_no_finish_reason_on_content_delta() {
        let response = CanonicalResponse {
            model: "gpt-4".into(),
            message: CanonicalMessage::text(CanonicalRole::Assistant, "hi"),
            finish_reason: CanonicalFinishReason::Stop,
            usage: Default::default(),
        };
        let mut stream = synthesize_single_block_stream(response);
        let first = futures::executor::block_on(stream.next()).unwrap().unwrap();
        assert!(first.finish_reason.is_none());
        assert_eq!(first.content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn collecting_stream_aggregates_tool_call_deltas() {
        let deltas = vec![
            Ok(CanonicalDelta {
                role: Some(CanonicalRole::Assistant),
                content: None,
                tool_call_deltas: vec![CanonicalToolCallDelta {
                    index: 0,
                    id: Some("A".into()),
                    name: Some("search".into()),
                    arguments_delta: Some("{\"q\":".into()),
                }],
                finish_reason: None,
            }),
            Ok(CanonicalDelta {
                role: None,
                content: None,
                tool_call_deltas: vec![CanonicalToolCallDelta {
                    index: 0,
                    id: None,
                    name: None,
                    arguments_delta: Some("\"rust\"}".into()),
                }],
                finish_reason: Some(CanonicalFinishReason::ToolCalls),
            }),
        ];
        let stream = stream::iter(deltas).boxed();
        let response = collect_stream(stream).await.unwrap();
        assert_eq!(response.message.tool_calls[0].arguments, "{\"q\":\"rust\"}");
        assert_eq!(response.finish_reason, CanonicalFinishReason::ToolCalls);
    }
}
