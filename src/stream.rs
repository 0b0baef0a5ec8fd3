//! Stream type aliases.

use std::pin::Pin;

use futures::Stream;

use crate::error::AgentError;
use crate::types::ChatStreamEvent;

/// A normalized response stream from a backend.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatStreamEvent, AgentError>> + Send>>;
