//! OpenAI-convention streaming.
//!
//! Parses the flat function-call wire format (`chat.completion.chunk`
//! payloads ending in a `[DONE]` sentinel) into canonical events. Content
//! deltas pass through immediately; tool-call fragments accumulate per wire
//! index and are flushed complete when a chunk carries a `finish_reason`.
//! The assembled [`ChatResponse`] is emitted at the sentinel, so a trailing
//! usage chunk still lands in the final event.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use eventsource_stream::Event;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::AgentError;
use crate::types::{
    ChatResponse, ChatStreamEvent, FinishReason, FunctionCall, MessageContent, ResponseMetadata,
    ToolCall, Usage,
};
use crate::utils::streaming::{EventBuilder, SseEventConverter};

/// One `chat.completion.chunk` payload.
#[derive(Debug, Clone, Deserialize)]
struct OpenAiStreamEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Option<Vec<OpenAiStreamChoice>>,
    #[serde(default)]
    usage: Option<OpenAiStreamUsage>,
    /// Some OpenAI-compatible gateways report failures as an error object
    /// inside an otherwise normal chunk.
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    delta: Option<OpenAiStreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiStreamUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
    #[serde(default)]
    total_tokens: Option<u32>,
}

/// A tool call under accumulation. The id and name arrive on the first
/// fragment for the index; argument text arrives in pieces.
#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Accumulation state for one stream.
#[derive(Debug, Default)]
struct StreamState {
    started: bool,
    response_id: Option<String>,
    model: Option<String>,
    content: String,
    tool_calls: BTreeMap<usize, PendingToolCall>,
    completed_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

/// Converter for the flat function-call convention.
///
/// Clones share accumulation state, which the stream factory relies on when
/// it clones the converter per event.
#[derive(Clone, Default)]
pub struct OpenAiEventConverter {
    state: Arc<Mutex<StreamState>>,
}

impl OpenAiEventConverter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn convert_openai_event(
        &self,
        event: OpenAiStreamEvent,
    ) -> Vec<Result<ChatStreamEvent, AgentError>> {
        if let Some(error) = event.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return vec![Ok(ChatStreamEvent::Error { error: message })];
        }

        let mut state = self.state.lock().await;
        let mut builder = EventBuilder::new();

        if !state.started {
            state.started = true;
            state.response_id = event.id.clone();
            state.model = event.model.clone();
            builder = builder.add_stream_start(ResponseMetadata {
                id: event.id,
                model: event.model,
                created: Some(chrono::Utc::now()),
                provider: "openai".to_string(),
            });
        }

        // With stream_options.include_usage the aggregate arrives in a
        // trailing chunk whose choices array is empty.
        if let Some(wire) = event.usage {
            let usage = Usage {
                prompt_tokens: wire.prompt_tokens.unwrap_or(0),
                completion_tokens: wire.completion_tokens.unwrap_or(0),
                total_tokens: wire
                    .total_tokens
                    .unwrap_or(wire.prompt_tokens.unwrap_or(0) + wire.completion_tokens.unwrap_or(0)),
            };
            state.usage = Some(usage.clone());
            builder = builder.add_usage_update(usage);
        }

        let Some(choice) = event.choices.and_then(|c| c.into_iter().next()) else {
            return builder.build_results();
        };

        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                state.content.push_str(&content);
                builder = builder.add_content_delta(content, choice.index);
            }
            for fragment in delta.tool_calls.unwrap_or_default() {
                let slot = state
                    .tool_calls
                    .entry(fragment.index.unwrap_or(0))
                    .or_default();
                if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                    slot.id = Some(id);
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                        slot.name = Some(name);
                    }
                    if let Some(arguments) = function.arguments {
                        slot.arguments.push_str(&arguments);
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            state.finish_reason = Some(map_finish_reason(&reason));
            builder = Self::flush_tool_calls(&mut state, builder);
        }

        builder.build_results()
    }

    /// Flush every accumulated call complete, in wire-index order. A
    /// fragment run that never carried an id gets a generated one so the
    /// result can still be correlated.
    fn flush_tool_calls(state: &mut StreamState, mut builder: EventBuilder) -> EventBuilder {
        let pending = std::mem::take(&mut state.tool_calls);
        for (index, call) in pending {
            let id = call
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            let name = call.name.unwrap_or_default();
            builder = builder.add_tool_call_delta(
                id.clone(),
                Some(name.clone()),
                Some(call.arguments.clone()),
                Some(index),
            );
            state.completed_calls.push(ToolCall {
                id,
                r#type: "function".to_string(),
                function: Some(FunctionCall {
                    name,
                    arguments: call.arguments,
                }),
            });
        }
        builder
    }
}

impl SseEventConverter for OpenAiEventConverter {
    fn convert_event(
        &self,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = Vec<Result<ChatStreamEvent, AgentError>>> + Send + Sync + '_>>
    {
        Box::pin(async move {
            match serde_json::from_str::<OpenAiStreamEvent>(&event.data) {
                Ok(openai_event) => self.convert_openai_event(openai_event).await,
                Err(error) => {
                    vec![Err(AgentError::Parse(format!(
                        "failed to parse openai event: {error}, data: {}",
                        event.data
                    )))]
                }
            }
        })
    }

    /// The `[DONE]` sentinel closes the run. Without a prior terminal chunk
    /// there is nothing to assemble, and the missing stop surfaces upstream
    /// as an incomplete stream.
    fn handle_stream_end(&self) -> Option<Result<ChatStreamEvent, AgentError>> {
        // Events are converted strictly in sequence, so the state lock is
        // free by the time the sentinel arrives.
        let mut state = self.state.try_lock().ok()?;
        let finish_reason = state.finish_reason.take()?;
        let tool_calls = std::mem::take(&mut state.completed_calls);
        let response = ChatResponse {
            id: state.response_id.take(),
            content: MessageContent::Text(std::mem::take(&mut state.content)),
            model: state.model.take(),
            usage: state.usage.take(),
            finish_reason: Some(finish_reason),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        };
        Some(Ok(ChatStreamEvent::StreamEnd { response }))
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(data: &str) -> Event {
        Event {
            event: "".to_string(),
            data: data.to_string(),
            id: "".to_string(),
            retry: None,
        }
    }

    async fn feed(
        converter: &OpenAiEventConverter,
        payloads: &[&str],
    ) -> Vec<Result<ChatStreamEvent, AgentError>> {
        let mut events = Vec::new();
        for payload in payloads {
            events.extend(converter.convert_event(sse(payload)).await);
        }
        events
    }

    #[tokio::test]
    async fn accumulates_fragmented_tool_call() {
        let converter = OpenAiEventConverter::new();
        let events = feed(
            &converter,
            &[
                r#"{"id":"chatcmpl-1","model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#,
                r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"get_time","arguments":""}}]},"finish_reason":null}]}"#,
                r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"tz\":"}}]},"finish_reason":null}]}"#,
                r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"UTC\"}"}}]},"finish_reason":null}]}"#,
                r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
                r#"{"id":"chatcmpl-1","choices":[],"usage":{"prompt_tokens":20,"completion_tokens":15,"total_tokens":35}}"#,
            ],
        )
        .await;

        let events: Vec<ChatStreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();
        assert!(matches!(events[0], ChatStreamEvent::StreamStart { .. }));

        let tool_events: Vec<&ChatStreamEvent> = events
            .iter()
            .filter(|e| matches!(e, ChatStreamEvent::ToolCallDelta { .. }))
            .collect();
        assert_eq!(tool_events.len(), 1);
        match tool_events[0] {
            ChatStreamEvent::ToolCallDelta {
                id,
                function_name,
                arguments_delta,
                ..
            } => {
                assert_eq!(id, "call_abc");
                assert_eq!(function_name.as_deref(), Some("get_time"));
                assert_eq!(arguments_delta.as_deref(), Some(r#"{"tz":"UTC"}"#));
            }
            _ => unreachable!(),
        }

        // The sentinel assembles the response, trailing usage included.
        let end = converter.handle_stream_end().unwrap().unwrap();
        match end {
            ChatStreamEvent::StreamEnd { response } => {
                assert_eq!(response.id.as_deref(), Some("chatcmpl-1"));
                assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
                assert_eq!(response.usage.as_ref().unwrap().total_tokens, 35);

                let calls = response.tool_calls.as_ref().unwrap();
                assert_eq!(calls.len(), 1);
                let invocations = response.tool_invocations();
                assert_eq!(invocations.len(), 1);
                assert_eq!(invocations[0].name, "get_time");
                assert_eq!(invocations[0].arguments["tz"], "UTC");
            }
            other => panic!("expected StreamEnd, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn content_deltas_round_trip_into_final_text() {
        let converter = OpenAiEventConverter::new();
        let events = feed(
            &converter,
            &[
                r#"{"id":"chatcmpl-2","model":"gpt-4o","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#,
                r#"{"id":"chatcmpl-2","choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":null}]}"#,
                r#"{"id":"chatcmpl-2","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            ],
        )
        .await;

        let mut streamed = String::new();
        for event in events.iter().map(|e| e.as_ref().unwrap()) {
            if let ChatStreamEvent::ContentDelta { delta, .. } = event {
                streamed.push_str(delta);
            }
        }
        assert_eq!(streamed, "Hello");

        match converter.handle_stream_end().unwrap().unwrap() {
            ChatStreamEvent::StreamEnd { response } => {
                assert_eq!(response.content_text(), Some("Hello"));
                assert_eq!(response.finish_reason, Some(FinishReason::Stop));
                assert!(response.tool_calls.is_none());
            }
            other => panic!("expected StreamEnd, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn generates_id_when_fragments_never_carry_one() {
        let converter = OpenAiEventConverter::new();
        let events = feed(
            &converter,
            &[
                r#"{"id":"chatcmpl-3","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"name":"ping","arguments":"{}"}}]},"finish_reason":null}]}"#,
                r#"{"id":"chatcmpl-3","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            ],
        )
        .await;

        let flushed = events
            .iter()
            .filter_map(|e| match e.as_ref().unwrap() {
                ChatStreamEvent::ToolCallDelta { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].starts_with("call_"));
        assert!(flushed[0].len() > "call_".len());
    }

    #[tokio::test]
    async fn parallel_calls_flush_in_index_order() {
        let converter = OpenAiEventConverter::new();
        let events = feed(
            &converter,
            &[
                r#"{"id":"chatcmpl-4","choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"beta","arguments":"{}"}}]},"finish_reason":null}]}"#,
                r#"{"id":"chatcmpl-4","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"alpha","arguments":"{}"}}]},"finish_reason":null}]}"#,
                r#"{"id":"chatcmpl-4","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            ],
        )
        .await;

        let names: Vec<String> = events
            .iter()
            .filter_map(|e| match e.as_ref().unwrap() {
                ChatStreamEvent::ToolCallDelta { function_name, .. } => function_name.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn sentinel_without_terminal_chunk_assembles_nothing() {
        let converter = OpenAiEventConverter::new();
        feed(
            &converter,
            &[r#"{"id":"chatcmpl-5","choices":[{"index":0,"delta":{"content":"partial"},"finish_reason":null}]}"#],
        )
        .await;
        assert!(converter.handle_stream_end().is_none());
    }

    #[tokio::test]
    async fn gateway_error_chunk_surfaces_as_error_event() {
        let converter = OpenAiEventConverter::new();
        let events = feed(
            &converter,
            &[r#"{"error":{"message":"model is overloaded","type":"server_error"}}"#],
        )
        .await;
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            ChatStreamEvent::Error { error } => assert!(error.contains("overloaded")),
            other => panic!("expected Error event, got {other:?}"),
        }
    }
}
