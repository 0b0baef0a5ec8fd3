//! The agent loop.
//!
//! Drives generate, stream, record, dispatch cycles against a
//! [`ChatBackend`] until the backend stops for a reason other than tool
//! use, the iteration budget runs out, or the run fails. A run is exposed
//! as a lazy stream of [`AgentEvent`]s; nothing is sent to the backend
//! until the stream is polled, and a dropped stream stops the run at the
//! next yield point with memory still consistent.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;

use crate::dispatch::{DEFAULT_BLOCKING_WORKERS, ToolDispatcher};
use crate::error::AgentError;
use crate::memory::{ConversationMemory, DEFAULT_MEMORY_LIMIT, Prompt};
use crate::providers::ToolConvention;
use crate::registry::{ToolHandler, ToolRegistry};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::stream::ChatStream;
use crate::types::{
    ChatMessage, ChatResponse, ChatStreamEvent, FinishReason, Tool, ToolResult,
    results_to_user_turn,
};
use crate::utils::CancelHandle;

/// Default generation-step budget for one run.
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// The generation seam. Implementations open one streaming chat call over
/// the given turns, advertising `tools` when present.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<Tool>>,
    ) -> Result<ChatStream, AgentError>;
}

/// One observable step of a run.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Incremental assistant text, forwarded as it streams.
    ContentDelta { delta: String },
    /// A generation step finished; carries the assembled response.
    MessageComplete { response: ChatResponse },
    /// A tool batch finished; results are in invocation order.
    ToolResults { results: Vec<ToolResult> },
}

/// A lazy, non-restartable run.
pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

/// Per-run overrides for [`Agent::run_with`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Registered tool names to advertise. `None` advertises every tool.
    pub tools: Option<Vec<String>>,
    /// System prompt for this run, overriding the agent's.
    pub system: Option<String>,
    /// Iteration budget for this run, overriding the agent's.
    pub max_iterations: Option<usize>,
    /// Cooperative cancellation handle, checked between loop phases.
    pub cancel: Option<CancelHandle>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn cancel_handle(mut self, handle: CancelHandle) -> Self {
        self.cancel = Some(handle);
        self
    }
}

/// A tool-calling agent over one conversation.
///
/// Holds the backend, the frozen tool registry, retry policy, and the
/// bounded conversation memory. Memory persists across runs, so follow-up
/// prompts continue the same conversation.
pub struct Agent {
    backend: Arc<dyn ChatBackend>,
    registry: Arc<ToolRegistry>,
    dispatcher: ToolDispatcher,
    retry: Arc<RetryExecutor>,
    memory: Arc<Mutex<ConversationMemory>>,
    system_prompt: Option<String>,
    max_iterations: usize,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    /// Run a prompt with the agent's defaults.
    pub fn run(&self, prompt: impl Into<Prompt>) -> AgentStream {
        self.run_with(prompt, RunOptions::default())
    }

    /// Run a prompt with per-run overrides.
    pub fn run_with(&self, prompt: impl Into<Prompt>, options: RunOptions) -> AgentStream {
        let prompt = prompt.into();
        let backend = self.backend.clone();
        let registry = self.registry.clone();
        let dispatcher = self.dispatcher.clone();
        let retry = self.retry.clone();
        let memory = self.memory.clone();
        let system = options.system.or_else(|| self.system_prompt.clone());
        let max_iterations = options.max_iterations.unwrap_or(self.max_iterations).max(1);
        let selection = options.tools;
        let cancel = options.cancel;

        Box::pin(stream! {
            let turns = match prompt.into_turns() {
                Ok(turns) => turns,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };

            let declarations = match &selection {
                Some(names) => match registry.declarations(names) {
                    Ok(declarations) => declarations,
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                },
                None => registry.all_declarations(),
            };
            let tools = if declarations.is_empty() {
                None
            } else {
                Some(declarations)
            };

            memory.lock().await.append_all(turns);

            for iteration in 1..=max_iterations {
                if is_cancelled(&cancel) {
                    yield Err(AgentError::Cancelled);
                    return;
                }

                let mut messages = Vec::new();
                if let Some(system) = &system {
                    messages.push(ChatMessage::system(system.clone()).build());
                }
                messages.extend(memory.lock().await.snapshot());
                tracing::debug!(iteration, turns = messages.len(), "starting generation step");

                let opened = retry
                    .execute_stream(|| {
                        let backend = backend.clone();
                        let messages = messages.clone();
                        let tools = tools.clone();
                        async move { backend.chat_stream(messages, tools).await }
                    })
                    .await;
                let mut chat_stream = match opened {
                    Ok(chat_stream) => chat_stream,
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                };

                let mut completed: Option<ChatResponse> = None;
                let mut reported_usage = None;
                while let Some(item) = chat_stream.next().await {
                    if is_cancelled(&cancel) {
                        yield Err(AgentError::Cancelled);
                        return;
                    }
                    match item {
                        Ok(ChatStreamEvent::StreamStart { .. }) => {}
                        Ok(ChatStreamEvent::ContentDelta { delta, .. }) => {
                            yield Ok(AgentEvent::ContentDelta { delta });
                        }
                        // Tool segments arrive complete here, but the
                        // assembled response carries the same calls, so
                        // extraction happens once at stream end.
                        Ok(ChatStreamEvent::ToolCallDelta { .. }) => {}
                        Ok(ChatStreamEvent::UsageUpdate { usage }) => {
                            reported_usage = Some(usage);
                        }
                        Ok(ChatStreamEvent::StreamEnd { response }) => {
                            completed = Some(response);
                            break;
                        }
                        Ok(ChatStreamEvent::Error { error }) => {
                            yield Err(AgentError::api(0, error));
                            return;
                        }
                        Err(error) => {
                            yield Err(error);
                            return;
                        }
                    }
                }

                let Some(mut response) = completed else {
                    yield Err(AgentError::IncompleteStream);
                    return;
                };
                if response.usage.is_none() {
                    response.usage = reported_usage;
                }
                // A backend may close its stream without reporting a stop;
                // the terminal event still carries a concrete reason.
                if response.finish_reason.is_none() {
                    response.finish_reason = Some(FinishReason::Unknown);
                }

                memory.lock().await.append(response.to_assistant_message());

                if response.finish_reason != Some(FinishReason::ToolCalls) {
                    yield Ok(AgentEvent::MessageComplete { response });
                    return;
                }

                let invocations = response.tool_invocations();
                let convention = ToolConvention::of_response(&response);
                yield Ok(AgentEvent::MessageComplete { response });

                if invocations.is_empty() {
                    yield Err(AgentError::ProtocolViolation(
                        "tool-use stop carried no extractable invocations".to_string(),
                    ));
                    return;
                }

                if is_cancelled(&cancel) {
                    yield Err(AgentError::Cancelled);
                    return;
                }
                tracing::debug!(iteration, count = invocations.len(), "dispatching tool batch");
                let results = dispatcher.execute_batch(&invocations).await;

                {
                    let mut memory = memory.lock().await;
                    match convention {
                        ToolConvention::Flat => {
                            for result in &results {
                                memory.append(result.to_tool_message());
                            }
                        }
                        ToolConvention::Structured => {
                            memory.append(results_to_user_turn(&results));
                        }
                    }
                }
                yield Ok(AgentEvent::ToolResults { results });
            }

            tracing::warn!(max_iterations, "iteration budget exhausted, forcing a length stop");
            yield Ok(AgentEvent::MessageComplete {
                response: ChatResponse::empty_with_finish_reason(FinishReason::Length),
            });
        })
    }

    /// Register a tool on a built agent. Runs already in flight keep the
    /// registry they started with.
    pub fn register_tool(&mut self, tool: Tool, handler: ToolHandler) -> Result<(), AgentError> {
        let mut registry = (*self.registry).clone();
        registry.register(tool, handler)?;
        self.registry = Arc::new(registry);
        self.dispatcher = self.dispatcher.with_registry(self.registry.clone());
        Ok(())
    }

    /// Registered tool names, in registration order.
    pub fn tool_names(&self) -> Vec<String> {
        self.registry.names().iter().map(|s| s.to_string()).collect()
    }

    /// The remembered conversation, oldest first.
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.memory.lock().await.snapshot()
    }

    /// Forget the conversation.
    pub async fn clear_history(&self) {
        self.memory.lock().await.clear();
    }
}

fn is_cancelled(cancel: &Option<CancelHandle>) -> bool {
    cancel.as_ref().is_some_and(CancelHandle::is_cancelled)
}

/// Builder for [`Agent`]. Validation happens in [`AgentBuilder::build`]:
/// a backend is required, the budget must be positive, the retry policy
/// must be sane, and tool registrations must not collide.
pub struct AgentBuilder {
    backend: Option<Arc<dyn ChatBackend>>,
    tools: Vec<(Tool, ToolHandler)>,
    retry_policy: RetryPolicy,
    system_prompt: Option<String>,
    max_iterations: usize,
    memory_limit: usize,
    blocking_workers: usize,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            tools: Vec::new(),
            retry_policy: RetryPolicy::default(),
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            blocking_workers: DEFAULT_BLOCKING_WORKERS,
        }
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl ChatBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    pub fn shared_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Queue a tool registration; collisions surface from [`Self::build`].
    pub fn tool(mut self, tool: Tool, handler: ToolHandler) -> Self {
        self.tools.push((tool, handler));
        self
    }

    pub fn system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn blocking_workers(mut self, workers: usize) -> Self {
        self.blocking_workers = workers;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let backend = self.backend.ok_or_else(|| {
            AgentError::Configuration("an agent needs a chat backend".to_string())
        })?;
        if self.max_iterations == 0 {
            return Err(AgentError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let mut registry = ToolRegistry::new();
        for (tool, handler) in self.tools {
            registry.register(tool, handler)?;
        }
        let registry = Arc::new(registry);
        let retry = Arc::new(RetryExecutor::new(self.retry_policy)?);
        let dispatcher =
            ToolDispatcher::with_blocking_workers(registry.clone(), self.blocking_workers);

        Ok(Agent {
            backend,
            registry,
            dispatcher,
            retry,
            memory: Arc::new(Mutex::new(ConversationMemory::new(self.memory_limit))),
            system_prompt: self.system_prompt,
            max_iterations: self.max_iterations,
        })
    }
}
