//! Chat message and response types.
//!
//! A [`ChatMessage`] is one conversation turn. Both tool-calling conventions
//! fit in it: structured segments travel in `content` as
//! [`ContentPart::ToolUse`] / [`ContentPart::ToolResult`], while the flat
//! convention uses the message-level `tool_calls` array and correlates
//! results through `role: Tool` plus `tool_call_id`.

use serde::{Deserialize, Serialize};

use super::common::{FinishReason, Usage};
use super::tools::{ToolCall, ToolInvocation};

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    /// Flat-convention tool result turn.
    Tool,
}

/// One typed segment of multi-part message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text segment.
    Text { text: String },
    /// Structured-convention tool invocation segment.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Structured-convention tool result segment.
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        is_error: bool,
        content: String,
    },
}

impl ContentPart {
    /// Text segment constructor.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Tool-use segment constructor.
    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Message content: plain text or a list of typed segments.
///
/// Untagged so the serialized form matches the wire: a bare string for text,
/// an array of blocks otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// The text of a plain message, or the first text segment.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// All text segments concatenated.
    pub fn all_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: MessageContent,
    /// Tool name, set on flat-convention result turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Flat-convention tool invocations requested by an assistant turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Flat-convention correlation id on a tool-role turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Start building a user message.
    pub fn user(text: impl Into<String>) -> ChatMessageBuilder {
        ChatMessageBuilder::new(MessageRole::User).text(text)
    }

    /// Start building a system message.
    pub fn system(text: impl Into<String>) -> ChatMessageBuilder {
        ChatMessageBuilder::new(MessageRole::System).text(text)
    }

    /// Start building an assistant message.
    pub fn assistant(text: impl Into<String>) -> ChatMessageBuilder {
        ChatMessageBuilder::new(MessageRole::Assistant).text(text)
    }

    /// Start building a message with explicit content segments.
    pub fn with_parts(role: MessageRole, parts: Vec<ContentPart>) -> ChatMessageBuilder {
        ChatMessageBuilder::new(role).parts(parts)
    }

    /// Flat-convention tool result turn.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            content: MessageContent::Text(content.into()),
            name: Some(tool_name.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// The message text, if any.
    pub fn content_text(&self) -> Option<&str> {
        self.content.text()
    }

    /// Canonical tool requests carried by this turn, from either convention.
    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        extract_invocations(&self.content, self.tool_calls.as_deref())
    }
}

/// Builder for [`ChatMessage`].
#[derive(Debug, Clone)]
pub struct ChatMessageBuilder {
    role: MessageRole,
    content: MessageContent,
    name: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
    tool_call_id: Option<String>,
}

impl ChatMessageBuilder {
    fn new(role: MessageRole) -> Self {
        Self {
            role,
            content: MessageContent::default(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Replace the content with plain text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.content = MessageContent::Text(text.into());
        self
    }

    /// Replace the content with typed segments.
    pub fn parts(mut self, parts: Vec<ContentPart>) -> Self {
        self.content = MessageContent::Parts(parts);
        self
    }

    /// Attach flat-convention tool calls.
    pub fn tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    /// Set the tool name (flat-convention result turns).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the correlation id (flat-convention result turns).
    pub fn tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = Some(id.into());
        self
    }

    /// Finish building the message.
    pub fn build(self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content,
            name: self.name,
            tool_calls: self.tool_calls,
            tool_call_id: self.tool_call_id,
        }
    }
}

/// A completed response from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider-assigned response id.
    pub id: Option<String>,
    /// Response content, including any structured tool-use segments.
    pub content: MessageContent,
    /// Model that produced the response.
    pub model: Option<String>,
    /// Token accounting, when reported.
    pub usage: Option<Usage>,
    /// Why generation stopped.
    pub finish_reason: Option<FinishReason>,
    /// Flat-convention tool invocations, when the provider uses them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatResponse {
    /// Response with the given content and nothing else.
    pub fn new(content: MessageContent) -> Self {
        Self {
            id: None,
            content,
            model: None,
            usage: None,
            finish_reason: None,
            tool_calls: None,
        }
    }

    /// Empty response, typically a synthetic stream end.
    pub fn empty() -> Self {
        Self::new(MessageContent::Text(String::new()))
    }

    /// Empty response carrying a specific finish reason.
    pub fn empty_with_finish_reason(reason: FinishReason) -> Self {
        let mut response = Self::empty();
        response.finish_reason = Some(reason);
        response
    }

    /// The response text, if any.
    pub fn content_text(&self) -> Option<&str> {
        self.content.text()
    }

    /// All text segments concatenated.
    pub fn all_text(&self) -> String {
        self.content.all_text()
    }

    /// Canonical tool requests, from either convention. The flat array wins
    /// when both are present, matching how providers actually respond.
    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        extract_invocations(&self.content, self.tool_calls.as_deref())
    }

    /// Whether the response carries any extractable tool request.
    pub fn has_tool_invocations(&self) -> bool {
        !self.tool_invocations().is_empty()
    }

    /// The assistant turn to append to conversation memory.
    pub fn to_assistant_message(&self) -> ChatMessage {
        ChatMessage {
            role: MessageRole::Assistant,
            content: self.content.clone(),
            name: None,
            tool_calls: self.tool_calls.clone(),
            tool_call_id: None,
        }
    }
}

fn extract_invocations(
    content: &MessageContent,
    tool_calls: Option<&[ToolCall]>,
) -> Vec<ToolInvocation> {
    if let Some(calls) = tool_calls {
        return calls
            .iter()
            .filter_map(|call| {
                let function = call.function.as_ref()?;
                Some(ToolInvocation {
                    id: call.id.clone(),
                    name: function.name.clone(),
                    arguments: function.decoded_arguments(),
                })
            })
            .collect();
    }
    match content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolUse { id, name, input } => Some(ToolInvocation {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect(),
        MessageContent::Text(_) => Vec::new(),
    }
}
