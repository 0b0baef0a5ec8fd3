//! Provider wire conventions.
//!
//! Two converter families cover the streaming tool-call conventions in the
//! wild: [`anthropic`] for structured content-segment streams and [`openai`]
//! for flat function-call streams. Both translate into the canonical
//! [`ChatStreamEvent`](crate::types::ChatStreamEvent) vocabulary, so the
//! agent loop never sees a provider-specific shape.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicEventConverter;
pub use openai::OpenAiEventConverter;

use crate::types::ChatResponse;

/// How a backend reports tool invocations and expects their results back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolConvention {
    /// Invocations are typed content segments; results go back as segments
    /// of a single user turn.
    #[default]
    Structured,
    /// Invocations are a message-level array; each result goes back as its
    /// own tool-role turn.
    Flat,
}

impl ToolConvention {
    /// Detect the convention from a response shape. A populated flat array
    /// is authoritative; otherwise structured segments are assumed.
    pub fn of_response(response: &ChatResponse) -> Self {
        match &response.tool_calls {
            Some(calls) if !calls.is_empty() => Self::Flat,
            _ => Self::Structured,
        }
    }
}
