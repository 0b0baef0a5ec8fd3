//! Common streaming utilities.
//!
//! Providers speak SSE; `eventsource-stream` handles UTF-8 boundaries, line
//! buffering and event framing, and the converter trait below turns each
//! parsed event into zero or more canonical [`ChatStreamEvent`]s.

use std::future::Future;
use std::pin::Pin;

use eventsource_stream::{Event, Eventsource};
use futures::Stream;
use futures_util::StreamExt;

use crate::error::AgentError;
use crate::stream::ChatStream;
use crate::types::ChatStreamEvent;

/// Conversion future: one provider event may yield several canonical events.
type SseEventFuture<'a> =
    Pin<Box<dyn Future<Output = Vec<Result<ChatStreamEvent, AgentError>>> + Send + Sync + 'a>>;

/// Converts provider-specific SSE events into canonical stream events.
///
/// Converters are stateful: they accumulate per-segment buffers between
/// calls and flush them at segment boundaries, so implementations keep their
/// state behind `Arc<Mutex<..>>` and stay `Clone`.
pub trait SseEventConverter: Send + Sync {
    /// Convert one SSE event into zero or more canonical events.
    fn convert_event(&self, event: Event) -> SseEventFuture<'_>;

    /// Called for the `[DONE]` sentinel some providers send instead of a
    /// structured terminal event.
    fn handle_stream_end(&self) -> Option<Result<ChatStreamEvent, AgentError>> {
        None
    }
}

/// Factory turning raw byte streams into normalized chat streams.
pub struct StreamFactory;

impl StreamFactory {
    /// Send a request and normalize its SSE response body.
    ///
    /// Non-success statuses are surfaced as [`AgentError::Api`] with the
    /// response text, before any event is produced.
    pub async fn create_eventsource_stream<C>(
        request_builder: reqwest::RequestBuilder,
        converter: C,
    ) -> Result<ChatStream, AgentError>
    where
        C: SseEventConverter + Clone + 'static,
    {
        let response = request_builder
            .send()
            .await
            .map_err(|e| AgentError::Http(format!("Failed to send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::api(status.as_u16(), error_text));
        }

        Ok(Self::from_byte_stream(response.bytes_stream(), converter))
    }

    /// Normalize any byte stream that carries SSE framing.
    ///
    /// This is the seam test fixtures and non-HTTP backends plug into.
    pub fn from_byte_stream<S, B, E, C>(byte_stream: S, converter: C) -> ChatStream
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
        C: SseEventConverter + Clone + 'static,
    {
        let sse_stream = byte_stream.eventsource();

        let chat_stream = sse_stream
            .then(move |event_result| {
                let converter = converter.clone();
                async move {
                    match event_result {
                        Ok(event) => {
                            // Sentinel used by flat-convention providers.
                            if event.data.trim() == "[DONE]" {
                                if let Some(end_event) = converter.handle_stream_end() {
                                    return vec![end_event];
                                }
                                return vec![];
                            }

                            if event.data.trim().is_empty() {
                                return vec![];
                            }

                            converter.convert_event(event).await
                        }
                        Err(e) => {
                            vec![Err(AgentError::Stream(format!("SSE parsing error: {e}")))]
                        }
                    }
                }
            })
            .flat_map(futures::stream::iter);

        Box::pin(chat_stream)
    }
}

/// Accumulator for multi-event conversions.
pub struct EventBuilder {
    events: Vec<ChatStreamEvent>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self {
            // Most conversions produce one or two events.
            events: Vec::with_capacity(2),
        }
    }

    /// Add a StreamStart event.
    pub fn add_stream_start(mut self, metadata: crate::types::ResponseMetadata) -> Self {
        self.events.push(ChatStreamEvent::StreamStart { metadata });
        self
    }

    /// Add a ContentDelta event (skipped when the delta is empty).
    pub fn add_content_delta(mut self, delta: String, index: Option<usize>) -> Self {
        if !delta.is_empty() {
            self.events.push(ChatStreamEvent::ContentDelta { delta, index });
        }
        self
    }

    /// Add a complete ToolCallDelta event.
    pub fn add_tool_call_delta(
        mut self,
        id: String,
        function_name: Option<String>,
        arguments_delta: Option<String>,
        index: Option<usize>,
    ) -> Self {
        self.events.push(ChatStreamEvent::ToolCallDelta {
            id,
            function_name,
            arguments_delta,
            index,
        });
        self
    }

    /// Add a UsageUpdate event.
    pub fn add_usage_update(mut self, usage: crate::types::Usage) -> Self {
        self.events.push(ChatStreamEvent::UsageUpdate { usage });
        self
    }

    /// Add a StreamEnd event.
    pub fn add_stream_end(mut self, response: crate::types::ChatResponse) -> Self {
        self.events.push(ChatStreamEvent::StreamEnd { response });
        self
    }

    /// Build the events vector.
    pub fn build(self) -> Vec<ChatStreamEvent> {
        self.events
    }

    /// Build the events vector wrapped in Results.
    pub fn build_results(self) -> Vec<Result<ChatStreamEvent, AgentError>> {
        self.events.into_iter().map(Ok).collect()
    }
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}
