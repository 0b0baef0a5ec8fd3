//! Concurrent tool execution.
//!
//! Runs a batch of invocations concurrently and returns the results in
//! invocation order. Failures stay inside their slot as error-carrying
//! results, so one bad invocation never aborts the batch. Async handlers
//! run on the scheduler directly; blocking handlers go through
//! `spawn_blocking` behind a bounded permit set.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use crate::error::AgentError;
use crate::registry::{BlockingToolFn, ToolHandler, ToolRegistry};
use crate::types::{ToolInvocation, ToolResult};

/// Default cap on concurrently running blocking handlers.
pub const DEFAULT_BLOCKING_WORKERS: usize = 10;

/// Executes tool invocations against a frozen registry.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    blocking_permits: Arc<Semaphore>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_blocking_workers(registry, DEFAULT_BLOCKING_WORKERS)
    }

    /// Cap concurrent blocking handlers at `workers` (at least one).
    pub fn with_blocking_workers(registry: Arc<ToolRegistry>, workers: usize) -> Self {
        Self {
            registry,
            blocking_permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Same worker pool, different registry. Batches already in flight keep
    /// the registry they started with.
    pub fn with_registry(&self, registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            blocking_permits: self.blocking_permits.clone(),
        }
    }

    /// Execute a batch concurrently. `results[i]` always answers
    /// `invocations[i]`, whatever order the handlers finish in.
    pub async fn execute_batch(&self, invocations: &[ToolInvocation]) -> Vec<ToolResult> {
        futures::future::join_all(invocations.iter().map(|inv| self.execute_one(inv))).await
    }

    async fn execute_one(&self, invocation: &ToolInvocation) -> ToolResult {
        let registered = match self.registry.resolve(&invocation.name) {
            Ok(tool) => tool,
            Err(error) => {
                tracing::warn!(tool = %invocation.name, "invocation names an unregistered tool");
                return ToolResult::error(
                    invocation.id.clone(),
                    invocation.name.clone(),
                    error.to_string(),
                );
            }
        };

        if let Err(violation) = registered.validate_args(&invocation.arguments) {
            tracing::warn!(tool = %invocation.name, %violation, "rejecting invocation arguments");
            return ToolResult::error(invocation.id.clone(), invocation.name.clone(), violation);
        }

        let started = Instant::now();
        let outcome = match registered.handler() {
            ToolHandler::Async(handler) => handler(invocation.arguments.clone()).await,
            ToolHandler::Blocking(handler) => {
                self.run_blocking(handler.clone(), invocation.arguments.clone())
                    .await
            }
        };
        tracing::debug!(
            tool = %invocation.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "tool finished"
        );

        match outcome {
            Ok(value) => ToolResult::success(invocation.id.clone(), invocation.name.clone(), value),
            Err(error) => ToolResult::error(
                invocation.id.clone(),
                invocation.name.clone(),
                error.to_string(),
            ),
        }
    }

    async fn run_blocking(
        &self,
        handler: BlockingToolFn,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, AgentError> {
        let _permit = self
            .blocking_permits
            .acquire()
            .await
            .map_err(|_| AgentError::Internal("blocking worker pool closed".to_string()))?;
        match tokio::task::spawn_blocking(move || handler(arguments)).await {
            Ok(result) => result,
            Err(join_error) => Err(AgentError::Internal(format!(
                "blocking handler crashed: {join_error}"
            ))),
        }
    }
}
