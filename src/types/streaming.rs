//! Canonical stream events.
//!
//! Converters translate provider wire events into this one vocabulary. Text
//! deltas are forwarded the moment the provider emits them; tool-call events
//! are buffered inside the converter and flushed complete at each segment
//! boundary, so a `ToolCallDelta` seen downstream always carries the whole
//! argument string for its segment.

use serde::{Deserialize, Serialize};

use super::chat::ChatResponse;
use super::common::{ResponseMetadata, Usage};

/// One event in a normalized response stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatStreamEvent {
    /// The stream opened; carries response metadata.
    StreamStart { metadata: ResponseMetadata },
    /// Incremental text. `index` is the source segment, when the provider
    /// reports one.
    ContentDelta { delta: String, index: Option<usize> },
    /// A complete tool-call segment, flushed at its boundary.
    ToolCallDelta {
        /// Correlation id for the invocation.
        id: String,
        /// Function name.
        function_name: Option<String>,
        /// Full accumulated argument string for this segment.
        arguments_delta: Option<String>,
        /// Transient segment identity used during accumulation.
        index: Option<usize>,
    },
    /// Token accounting update.
    UsageUpdate { usage: Usage },
    /// Terminal event: the completed response, including the finish reason.
    StreamEnd { response: ChatResponse },
    /// Provider-reported error payload.
    Error { error: String },
}
