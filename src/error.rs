//! Error types for the agent loop
//!
//! A single error enum covers configuration, registry, protocol, transport
//! and tool-execution failures. The retry executor consults
//! [`AgentError::is_retryable`] to decide whether an attempt may be repeated.

use thiserror::Error;

/// Errors produced by agents, backends and tools.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Invalid agent or policy configuration, caught at build time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A prompt that normalizes to zero turns.
    #[error("Invalid prompt format: prompt must contain at least one message")]
    InvalidPromptFormat,

    /// A tool with the same name is already registered.
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// The tool's input contract is not a usable JSON Schema.
    #[error("Invalid input contract for tool '{tool}': {reason}")]
    InvalidContract { tool: String, reason: String },

    /// Lookup of a tool name that was never registered.
    #[error("Unknown tool: '{0}'")]
    UnknownTool(String),

    /// The backend violated the tool-calling protocol
    /// (e.g. a tool-use stop with no extractable invocations).
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The event stream ended without a terminal stop event.
    #[error("Stream ended without a stop event")]
    IncompleteStream,

    /// API error with status code and message.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Stream processing error.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Payload parsing error.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The provider throttled the request.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The request or stream timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Authentication or authorization failure.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A tool handler failed. Inside a batch this is absorbed into an
    /// error-flagged result; it never aborts the other invocations.
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// All retry attempts were consumed; carries the last failure.
    #[error("Retries exhausted after {attempts} attempts ({elapsed_ms}ms): {source}")]
    RetriesExhausted {
        attempts: u32,
        elapsed_ms: u64,
        #[source]
        source: Box<AgentError>,
    },

    /// The run was cancelled through its handle.
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal invariant failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl AgentError {
    /// Whether a fresh attempt could plausibly succeed.
    ///
    /// Throttling, timeouts and transport hiccups are transient; bad
    /// requests, auth failures and protocol violations are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::Timeout(_) | Self::Http(_) | Self::Stream(_) => true,
            Self::Api { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    /// Convenience constructor for API errors.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Convenience constructor for tool handler failures.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
