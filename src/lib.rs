//! # Charsiu - Tool-Calling Agent Loops for Streaming LLMs
//!
//! Charsiu drives the multi-turn conversation between a streaming chat
//! backend and a set of registered tools: generate, stream the reply,
//! execute the requested tools, feed the results back, and repeat until
//! the model stops on its own.
//!
#![deny(unsafe_code)]

//! ## Features
//!
//! - **One event vocabulary**: Anthropic-style structured segments and
//!   OpenAI-style flat function calls normalize into the same canonical
//!   stream events, so the loop never sees a provider shape.
//! - **Validated tools**: every registration compiles its JSON Schema
//!   contract once; invalid arguments are rejected before a handler runs.
//! - **Concurrent dispatch**: tool batches run concurrently with results
//!   kept in invocation order, and blocking handlers are confined to a
//!   bounded worker pool.
//! - **Retry with backoff**: transient backend failures retry under an
//!   exponential-backoff policy with jitter; a stream is never replayed
//!   once it has produced output.
//! - **Bounded memory**: conversation history is pruned to a turn limit
//!   without ever dropping the most recent turn.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use charsiu::prelude::*;
//! use serde_json::json;
//!
//! # struct MyBackend;
//! # #[async_trait::async_trait]
//! # impl ChatBackend for MyBackend {
//! #     async fn chat_stream(
//! #         &self,
//! #         _messages: Vec<ChatMessage>,
//! #         _tools: Option<Vec<Tool>>,
//! #     ) -> Result<ChatStream, AgentError> {
//! #         unimplemented!()
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent = Agent::builder()
//!         .backend(MyBackend)
//!         .tool(
//!             Tool::function(
//!                 "get_weather",
//!                 "Look up the current weather for a city",
//!                 json!({
//!                     "type": "object",
//!                     "properties": { "city": { "type": "string" } },
//!                     "required": ["city"]
//!                 }),
//!             ),
//!             ToolHandler::from_async(|args| async move {
//!                 Ok(json!({ "city": args["city"], "forecast": "sunny" }))
//!             }),
//!         )
//!         .build()?;
//!
//!     let mut run = agent.run("What's the weather in Paris?");
//!     while let Some(event) = run.next().await {
//!         match event? {
//!             AgentEvent::ContentDelta { delta } => print!("{delta}"),
//!             AgentEvent::MessageComplete { .. } => println!(),
//!             AgentEvent::ToolResults { results } => {
//!                 eprintln!("ran {} tool(s)", results.len());
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod stream;
pub mod types;
pub mod utils;

// The surface most integrations need, also available without the prelude.
pub use agent::{Agent, AgentBuilder, AgentEvent, AgentStream, ChatBackend, RunOptions};
pub use error::AgentError;
pub use memory::{ConversationMemory, Prompt};
pub use registry::{ToolHandler, ToolRegistry};
pub use retry::{RetryExecutor, RetryPolicy};
pub use stream::ChatStream;

/// Common imports for working with agents.
pub mod prelude {
    pub use crate::agent::{
        Agent, AgentBuilder, AgentEvent, AgentStream, ChatBackend, DEFAULT_MAX_ITERATIONS,
        RunOptions,
    };
    pub use crate::dispatch::ToolDispatcher;
    pub use crate::error::AgentError;
    pub use crate::memory::{ConversationMemory, DEFAULT_MEMORY_LIMIT, Prompt};
    pub use crate::providers::{AnthropicEventConverter, OpenAiEventConverter, ToolConvention};
    pub use crate::registry::{ToolHandler, ToolRegistry};
    pub use crate::retry::{RetryExecutor, RetryPolicy};
    pub use crate::stream::ChatStream;
    pub use crate::types::*;
    pub use crate::utils::{CancelHandle, new_cancel_handle};

    // Consuming an `AgentStream` needs `StreamExt::next`.
    pub use futures::StreamExt;
}
