//! Common response types shared by every provider convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why the model stopped emitting output.
///
/// Providers report this under different names; converters map their wire
/// values onto this enum so the rest of the crate never sees provider
/// vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the assistant turn.
    Stop,
    /// The output token limit was reached.
    Length,
    /// A configured stop sequence matched.
    StopSequence,
    /// The model is requesting tool invocations.
    ToolCalls,
    /// The provider filtered the content.
    ContentFilter,
    /// The provider reported an error condition.
    Error,
    /// A provider-specific reason with no canonical mapping.
    Other(String),
    /// The provider did not report a reason.
    Unknown,
}

impl FinishReason {
    /// Whether this reason ends the agent loop. Every reason is terminal
    /// except a tool-use request, which hands control to the dispatcher.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ToolCalls)
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens consumed.
    pub prompt_tokens: u32,
    /// Output tokens generated.
    pub completion_tokens: u32,
    /// Total tokens for the request.
    pub total_tokens: u32,
}

impl Usage {
    /// Accumulate another report into this one. Used to aggregate usage
    /// across the generation steps of a single run.
    pub fn merge(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Metadata announced at the start of a response stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Provider-assigned response id.
    pub id: Option<String>,
    /// Model that is producing the response.
    pub model: Option<String>,
    /// Creation timestamp.
    pub created: Option<DateTime<Utc>>,
    /// Which converter produced the stream.
    pub provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(FinishReason::ToolCalls).unwrap(),
            serde_json::json!("tool_calls")
        );
        assert_eq!(
            serde_json::to_value(FinishReason::StopSequence).unwrap(),
            serde_json::json!("stop_sequence")
        );
    }

    #[test]
    fn only_tool_calls_is_non_terminal() {
        assert!(!FinishReason::ToolCalls.is_terminal());
        assert!(FinishReason::Stop.is_terminal());
        assert!(FinishReason::Length.is_terminal());
        assert!(FinishReason::StopSequence.is_terminal());
        assert!(FinishReason::Error.is_terminal());
    }

    #[test]
    fn usage_merge_accumulates() {
        let mut total = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        total.merge(&Usage {
            prompt_tokens: 20,
            completion_tokens: 7,
            total_tokens: 27,
        });
        assert_eq!(total.prompt_tokens, 30);
        assert_eq!(total.completion_tokens, 12);
        assert_eq!(total.total_tokens, 42);
    }
}
