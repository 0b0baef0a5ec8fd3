//! Tool declaration, invocation and result types.
//!
//! Two wire conventions exist for tool calling. The flat convention carries
//! an array of [`ToolCall`]s on the assistant message, with arguments as an
//! encoded JSON string. The structured convention embeds typed `tool_use`
//! segments in the message content (see [`crate::types::ContentPart`]).
//! Either way, requests are canonicalized into [`ToolInvocation`]s before
//! they reach the dispatcher, and results come back as [`ToolResult`]s.

use serde::{Deserialize, Serialize};

use super::chat::{ChatMessage, ContentPart, MessageContent, MessageRole};

/// A tool invocation in the flat convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id assigned by the provider.
    pub id: String,
    /// Call type (usually "function").
    pub r#type: String,
    /// Function name and encoded arguments.
    pub function: Option<FunctionCall>,
}

/// Function name plus arguments as an encoded JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl FunctionCall {
    /// Decode the argument string into a JSON value.
    ///
    /// Providers occasionally emit truncated or empty argument strings; a
    /// decode failure degrades to an empty object rather than aborting the
    /// run.
    pub fn decoded_arguments(&self) -> serde_json::Value {
        if self.arguments.trim().is_empty() {
            return serde_json::json!({});
        }
        serde_json::from_str(&self.arguments).unwrap_or_else(|e| {
            tracing::debug!("tool argument decode failed, substituting empty object: {e}");
            serde_json::json!({})
        })
    }
}

/// Tool declaration advertised to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool type (usually "function").
    pub r#type: String,
    /// Function definition.
    pub function: ToolFunction,
}

impl Tool {
    /// Create a new function tool. `parameters` is the input contract: a
    /// JSON Schema describing the arguments the tool accepts.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            r#type: "function".to_string(),
            function: ToolFunction {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    /// The declared tool name.
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Tool function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    /// Function name.
    pub name: String,
    /// Function description.
    pub description: String,
    /// JSON schema for function parameters.
    pub parameters: serde_json::Value,
}

/// A canonical tool request, convention-independent.
///
/// Converters and response accessors produce these from either wire shape;
/// the dispatcher only ever sees this form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Correlation id; results echo it back.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Decoded arguments.
    pub arguments: serde_json::Value,
}

/// Payload of a completed tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultOutput {
    /// Plain text payload.
    Text { value: String },
    /// Structured payload (the handler returned an object or array).
    Json { value: serde_json::Value },
    /// Failure description.
    ErrorText { value: String },
}

impl ToolResultOutput {
    /// Build the payload from a handler's return value: objects and arrays
    /// stay structured, everything else is carried as text.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            v @ (serde_json::Value::Object(_) | serde_json::Value::Array(_)) => {
                Self::Json { value: v }
            }
            serde_json::Value::String(s) => Self::Text { value: s },
            other => Self::Text {
                value: other.to_string(),
            },
        }
    }

    /// Whether this payload describes a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::ErrorText { .. })
    }

    /// Render the payload as a string for wire formats that only carry text.
    pub fn to_string_lossy(&self) -> String {
        match self {
            Self::Text { value } | Self::ErrorText { value } => value.clone(),
            Self::Json { value } => value.to_string(),
        }
    }
}

/// Outcome of one tool invocation, correlated back to its request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the invocation this result answers.
    pub tool_call_id: String,
    /// Name of the tool that ran (or was asked to run).
    pub tool_name: String,
    /// Result payload.
    pub output: ToolResultOutput,
}

impl ToolResult {
    /// Successful result from a handler return value.
    pub fn success(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output: ToolResultOutput::from_value(value),
        }
    }

    /// Error-flagged result. Used for unknown tools, rejected arguments and
    /// handler failures; the batch keeps going either way.
    pub fn error(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output: ToolResultOutput::ErrorText {
                value: message.into(),
            },
        }
    }

    /// Whether this result is error-flagged.
    pub fn is_error(&self) -> bool {
        self.output.is_error()
    }

    /// Structured-convention wire form: a `tool_result` content segment.
    pub fn to_content_part(&self) -> ContentPart {
        ContentPart::ToolResult {
            tool_use_id: self.tool_call_id.clone(),
            is_error: self.is_error(),
            content: self.output.to_string_lossy(),
        }
    }

    /// Flat-convention wire form: a standalone tool-role turn.
    pub fn to_tool_message(&self) -> ChatMessage {
        ChatMessage::tool_result(
            self.tool_call_id.clone(),
            self.tool_name.clone(),
            self.output.to_string_lossy(),
        )
    }
}

/// Collapse a batch of results into the structured-convention turn: one user
/// message whose content is the result segments, in request order.
pub fn results_to_user_turn(results: &[ToolResult]) -> ChatMessage {
    ChatMessage {
        role: MessageRole::User,
        content: MessageContent::Parts(results.iter().map(ToolResult::to_content_part).collect()),
        name: None,
        tool_calls: None,
        tool_call_id: None,
    }
}
