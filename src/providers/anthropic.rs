//! Anthropic-convention streaming.
//!
//! Parses the structured content-segment wire format (`message_start`,
//! `content_block_*`, `message_delta`, `message_stop`) into canonical
//! events. Text deltas pass through the moment they arrive; tool-use
//! segments accumulate their argument fragments inside the converter and
//! are flushed as one complete [`ChatStreamEvent::ToolCallDelta`] when the
//! segment closes. `message_stop` yields the fully assembled
//! [`ChatResponse`].

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use eventsource_stream::Event;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::AgentError;
use crate::types::{
    ChatResponse, ChatStreamEvent, ContentPart, FinishReason, MessageContent, ResponseMetadata,
    Usage,
};
use crate::utils::streaming::{EventBuilder, SseEventConverter};

/// Anthropic stream event shell. One per SSE data payload.
#[derive(Debug, Clone, Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    message: Option<AnthropicMessageStart>,
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    content_block: Option<AnthropicContentBlock>,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
    #[serde(default)]
    error: Option<AnthropicErrorPayload>,
}

/// Message envelope carried by `message_start`.
#[derive(Debug, Clone, Deserialize)]
struct AnthropicMessageStart {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

/// Segment header carried by `content_block_start`.
#[derive(Debug, Clone, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Delta payload for `content_block_delta` and `message_delta`.
#[derive(Debug, Clone, Deserialize)]
struct AnthropicDelta {
    #[serde(rename = "type", default)]
    delta_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicErrorPayload {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// One content segment under accumulation, keyed by its wire index.
#[derive(Debug)]
enum Segment {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Accumulation state for one stream.
#[derive(Debug, Default)]
struct StreamState {
    response_id: Option<String>,
    model: Option<String>,
    /// Segments in wire-index order, so the assembled content preserves the
    /// order the provider emitted them in.
    segments: BTreeMap<usize, Segment>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

/// Converter for the structured content-segment convention.
///
/// Clones share accumulation state, which the stream factory relies on when
/// it clones the converter per event.
#[derive(Clone, Default)]
pub struct AnthropicEventConverter {
    state: Arc<Mutex<StreamState>>,
}

impl AnthropicEventConverter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn convert_anthropic_event(
        &self,
        event: AnthropicStreamEvent,
    ) -> Vec<Result<ChatStreamEvent, AgentError>> {
        let mut state = self.state.lock().await;
        match event.event_type.as_str() {
            "message_start" => Self::on_message_start(&mut state, event.message),
            "content_block_start" => {
                Self::on_block_start(&mut state, event.index, event.content_block)
            }
            "content_block_delta" => Self::on_block_delta(&mut state, event.index, event.delta),
            "content_block_stop" => Self::on_block_stop(&state, event.index),
            "message_delta" => Self::on_message_delta(&mut state, event.delta, event.usage),
            "message_stop" => Self::on_message_stop(&mut state),
            "ping" => Vec::new(),
            "error" => Self::on_error(event.error),
            other => {
                tracing::debug!(event_type = other, "ignoring unknown anthropic event");
                Vec::new()
            }
        }
    }

    fn on_message_start(
        state: &mut StreamState,
        message: Option<AnthropicMessageStart>,
    ) -> Vec<Result<ChatStreamEvent, AgentError>> {
        if let Some(message) = message {
            state.response_id = message.id;
            state.model = message.model;
            if let Some(wire) = message.usage {
                state.usage = Some(usage_from_wire(&wire, None));
            }
        }
        let metadata = ResponseMetadata {
            id: state.response_id.clone(),
            model: state.model.clone(),
            created: Some(chrono::Utc::now()),
            provider: "anthropic".to_string(),
        };
        vec![Ok(ChatStreamEvent::StreamStart { metadata })]
    }

    fn on_block_start(
        state: &mut StreamState,
        index: Option<usize>,
        block: Option<AnthropicContentBlock>,
    ) -> Vec<Result<ChatStreamEvent, AgentError>> {
        let index = index.unwrap_or(0);
        if let Some(block) = block {
            if block.block_type == "tool_use" {
                state.segments.insert(
                    index,
                    Segment::ToolUse {
                        id: block.id.unwrap_or_default(),
                        name: block.name.unwrap_or_default(),
                        input_json: String::new(),
                    },
                );
            } else {
                state
                    .segments
                    .entry(index)
                    .or_insert_with(|| Segment::Text(String::new()));
            }
        }
        Vec::new()
    }

    fn on_block_delta(
        state: &mut StreamState,
        index: Option<usize>,
        delta: Option<AnthropicDelta>,
    ) -> Vec<Result<ChatStreamEvent, AgentError>> {
        let index = index.unwrap_or(0);
        let Some(delta) = delta else {
            return Vec::new();
        };
        match delta.delta_type.as_deref() {
            Some("text_delta") => {
                let Some(text) = delta.text.filter(|t| !t.is_empty()) else {
                    return Vec::new();
                };
                let segment = state
                    .segments
                    .entry(index)
                    .or_insert_with(|| Segment::Text(String::new()));
                match segment {
                    Segment::Text(buffer) => buffer.push_str(&text),
                    Segment::ToolUse { .. } => {
                        tracing::debug!(index, "text delta addressed to a tool-use segment");
                        return Vec::new();
                    }
                }
                vec![Ok(ChatStreamEvent::ContentDelta {
                    delta: text,
                    index: Some(index),
                })]
            }
            Some("input_json_delta") => {
                if let Some(fragment) = delta.partial_json {
                    if let Some(Segment::ToolUse { input_json, .. }) =
                        state.segments.get_mut(&index)
                    {
                        input_json.push_str(&fragment);
                    } else {
                        tracing::debug!(index, "argument fragment without an open tool segment");
                    }
                }
                Vec::new()
            }
            // thinking_delta and other segment kinds are not surfaced.
            _ => Vec::new(),
        }
    }

    /// A closing tool-use segment flushes as one complete `ToolCallDelta`.
    /// Closing text segments produce nothing; their deltas already streamed.
    fn on_block_stop(
        state: &StreamState,
        index: Option<usize>,
    ) -> Vec<Result<ChatStreamEvent, AgentError>> {
        let index = index.unwrap_or(0);
        match state.segments.get(&index) {
            Some(Segment::ToolUse {
                id,
                name,
                input_json,
            }) => {
                vec![Ok(ChatStreamEvent::ToolCallDelta {
                    id: id.clone(),
                    function_name: Some(name.clone()),
                    arguments_delta: Some(input_json.clone()),
                    index: Some(index),
                })]
            }
            _ => Vec::new(),
        }
    }

    fn on_message_delta(
        state: &mut StreamState,
        delta: Option<AnthropicDelta>,
        usage: Option<AnthropicUsage>,
    ) -> Vec<Result<ChatStreamEvent, AgentError>> {
        let mut builder = EventBuilder::new();
        if let Some(stop_reason) = delta.and_then(|d| d.stop_reason) {
            state.finish_reason = Some(map_stop_reason(&stop_reason));
        }
        if let Some(wire) = usage {
            // Anthropic usage counts are cumulative, so overwrite, keeping
            // the prompt count learned at message_start.
            let merged = usage_from_wire(&wire, state.usage.as_ref());
            state.usage = Some(merged.clone());
            builder = builder.add_usage_update(merged);
        }
        builder.build_results()
    }

    fn on_message_stop(state: &mut StreamState) -> Vec<Result<ChatStreamEvent, AgentError>> {
        let segments = std::mem::take(&mut state.segments);
        let mut parts = Vec::new();
        for segment in segments.into_values() {
            match segment {
                Segment::Text(text) => {
                    if !text.is_empty() {
                        parts.push(ContentPart::text(text));
                    }
                }
                Segment::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let input = decode_tool_input(&name, &input_json);
                    parts.push(ContentPart::ToolUse { id, name, input });
                }
            }
        }

        let single_text = match parts.as_slice() {
            [] => Some(String::new()),
            [ContentPart::Text { text }] => Some(text.clone()),
            _ => None,
        };
        let content = match single_text {
            Some(text) => MessageContent::Text(text),
            None => MessageContent::Parts(parts),
        };

        let response = ChatResponse {
            id: state.response_id.take(),
            content,
            model: state.model.take(),
            usage: state.usage.take(),
            finish_reason: Some(state.finish_reason.take().unwrap_or(FinishReason::Stop)),
            tool_calls: None,
        };
        vec![Ok(ChatStreamEvent::StreamEnd { response })]
    }

    fn on_error(
        error: Option<AnthropicErrorPayload>,
    ) -> Vec<Result<ChatStreamEvent, AgentError>> {
        let (kind, message) = match error {
            Some(payload) => (
                payload.error_type.unwrap_or_else(|| "api_error".to_string()),
                payload
                    .message
                    .unwrap_or_else(|| "unknown provider error".to_string()),
            ),
            None => (
                "api_error".to_string(),
                "unknown provider error".to_string(),
            ),
        };
        let error = match kind.as_str() {
            "overloaded_error" | "rate_limit_error" => AgentError::RateLimited(message),
            "authentication_error" | "permission_error" => AgentError::Authentication(message),
            _ => AgentError::api(0, format!("{kind}: {message}")),
        };
        vec![Err(error)]
    }
}

impl SseEventConverter for AnthropicEventConverter {
    fn convert_event(
        &self,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = Vec<Result<ChatStreamEvent, AgentError>>> + Send + Sync + '_>>
    {
        Box::pin(async move {
            match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                Ok(anthropic_event) => self.convert_anthropic_event(anthropic_event).await,
                Err(error) => {
                    vec![Err(AgentError::Parse(format!(
                        "failed to parse anthropic event: {error}, data: {}",
                        event.data
                    )))]
                }
            }
        })
    }
}

/// Cumulative wire usage folded over whatever was reported so far.
fn usage_from_wire(wire: &AnthropicUsage, previous: Option<&Usage>) -> Usage {
    let mut usage = previous.cloned().unwrap_or_default();
    if let Some(input) = wire.input_tokens {
        usage.prompt_tokens = input;
    }
    if let Some(output) = wire.output_tokens {
        usage.completion_tokens = output;
    }
    usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
    usage
}

/// Decode an accumulated argument buffer. Empty and malformed buffers decode
/// to an empty object.
fn decode_tool_input(name: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::debug!(tool = name, %error, "malformed tool arguments, using empty object");
            serde_json::json!({})
        }
    }
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "stop_sequence" => FinishReason::StopSequence,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}
