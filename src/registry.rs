//! Tool registry: declarations plus their executors.
//!
//! Registration happens while the agent is being configured; once a run
//! starts the registry is only read (the agent shares it behind an `Arc`).
//! Contracts are compiled at registration time so a bad schema is rejected
//! up front instead of surfacing mid-run.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::AgentError;
use crate::types::Tool;

/// Boxed future returned by async tool handlers.
pub type BoxedToolFuture = Pin<Box<dyn Future<Output = Result<Value, AgentError>> + Send>>;
/// Shared async handler function.
pub type AsyncToolFn = Arc<dyn Fn(Value) -> BoxedToolFuture + Send + Sync>;
/// Shared blocking handler function.
pub type BlockingToolFn = Arc<dyn Fn(Value) -> Result<Value, AgentError> + Send + Sync>;

/// Executor for a registered tool.
///
/// Async handlers run directly on the runtime; blocking handlers are moved
/// onto the bounded blocking pool so they never stall the reactor.
#[derive(Clone)]
pub enum ToolHandler {
    Async(AsyncToolFn),
    Blocking(BlockingToolFn),
}

impl ToolHandler {
    /// Wrap a non-blocking async function.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AgentError>> + Send + 'static,
    {
        Self::Async(Arc::new(move |args| Box::pin(f(args))))
    }

    /// Wrap a synchronous function that may block.
    pub fn from_blocking<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, AgentError> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(f))
    }
}

/// A declaration, its compiled input contract, and its executor.
#[derive(Clone)]
pub struct RegisteredTool {
    tool: Tool,
    validator: Arc<jsonschema::Validator>,
    handler: ToolHandler,
}

impl RegisteredTool {
    /// The wire declaration advertised to backends.
    pub fn declaration(&self) -> &Tool {
        &self.tool
    }

    /// The registered name.
    pub fn name(&self) -> &str {
        self.tool.name()
    }

    /// The executor.
    pub fn handler(&self) -> &ToolHandler {
        &self.handler
    }

    /// Check arguments against the input contract. Reports up to three
    /// violations in one message.
    pub fn validate_args(&self, args: &Value) -> Result<(), String> {
        if self.validator.validate(args).is_err() {
            let mut msgs = Vec::new();
            for err in self.validator.iter_errors(args) {
                msgs.push(format!("{} at {}", err, err.instance_path));
                if msgs.len() >= 3 {
                    break;
                }
            }
            return Err(format!(
                "arguments failed schema validation: {}",
                msgs.join("; ")
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("tool", &self.tool)
            .finish_non_exhaustive()
    }
}

/// Name-keyed tool store.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    // registration order, for stable declaration listings
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its declared name.
    ///
    /// Rejects duplicate names and contracts that are not object-typed JSON
    /// Schemas (or fail to compile).
    pub fn register(&mut self, tool: Tool, handler: ToolHandler) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if name.trim().is_empty() {
            return Err(AgentError::InvalidContract {
                tool: name,
                reason: "tool name must not be empty".into(),
            });
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        let validator = compile_contract(&name, &tool.function.parameters)?;
        tracing::debug!(tool = %name, "registered tool");
        self.order.push(name.clone());
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                validator: Arc::new(validator),
                handler,
            },
        );
        Ok(())
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Result<&RegisteredTool, AgentError> {
        self.tools
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for a run's allow-list, in the order given. A name that
    /// was never registered fails the whole selection, before any backend
    /// call is made.
    pub fn declarations(&self, names: &[String]) -> Result<Vec<Tool>, AgentError> {
        names
            .iter()
            .map(|name| self.resolve(name).map(|t| t.declaration().clone()))
            .collect()
    }

    /// Every declaration, in registration order.
    pub fn all_declarations(&self) -> Vec<Tool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.declaration().clone())
            .collect()
    }
}

fn compile_contract(name: &str, schema: &Value) -> Result<jsonschema::Validator, AgentError> {
    if !schema.is_object() {
        return Err(AgentError::InvalidContract {
            tool: name.to_string(),
            reason: "parameters must be a JSON Schema object".into(),
        });
    }
    jsonschema::validator_for(schema).map_err(|e| AgentError::InvalidContract {
        tool: name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_tool() -> Tool {
        Tool::function(
            "get_weather",
            "Look up current conditions",
            json!({
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }),
        )
    }

    fn noop_handler() -> ToolHandler {
        ToolHandler::from_async(|_args| async { Ok(json!(null)) })
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = ToolRegistry::new();
        registry.register(weather_tool(), noop_handler()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("get_weather").unwrap().name(), "get_weather");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(weather_tool(), noop_handler()).unwrap();
        let err = registry
            .register(weather_tool(), noop_handler())
            .unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "get_weather"));
    }

    #[test]
    fn non_object_contract_is_rejected() {
        let mut registry = ToolRegistry::new();
        let tool = Tool::function("bad", "broken contract", json!("not a schema"));
        let err = registry.register(tool, noop_handler()).unwrap_err();
        assert!(matches!(err, AgentError::InvalidContract { tool, .. } if tool == "bad"));
    }

    #[test]
    fn uncompilable_contract_is_rejected() {
        let mut registry = ToolRegistry::new();
        let tool = Tool::function("bad", "broken contract", json!({"type": "definitely-not"}));
        let err = registry.register(tool, noop_handler()).unwrap_err();
        assert!(matches!(err, AgentError::InvalidContract { .. }));
    }

    #[test]
    fn unknown_names_fail_resolution_and_selection() {
        let mut registry = ToolRegistry::new();
        registry.register(weather_tool(), noop_handler()).unwrap();

        let err = registry.resolve("nope").unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(name) if name == "nope"));

        let err = registry
            .declarations(&["get_weather".into(), "nope".into()])
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));
    }

    #[test]
    fn declarations_follow_the_request_order() {
        let mut registry = ToolRegistry::new();
        registry.register(weather_tool(), noop_handler()).unwrap();
        registry
            .register(
                Tool::function("echo", "Echo text back", json!({"type": "object"})),
                noop_handler(),
            )
            .unwrap();

        let decls = registry
            .declarations(&["echo".into(), "get_weather".into()])
            .unwrap();
        assert_eq!(decls[0].name(), "echo");
        assert_eq!(decls[1].name(), "get_weather");
    }

    #[test]
    fn argument_validation_reports_violations() {
        let mut registry = ToolRegistry::new();
        registry.register(weather_tool(), noop_handler()).unwrap();
        let tool = registry.resolve("get_weather").unwrap();

        assert!(tool.validate_args(&json!({"city": "Osaka"})).is_ok());

        let err = tool.validate_args(&json!({"city": 7})).unwrap_err();
        assert!(err.contains("schema validation"));

        let err = tool.validate_args(&json!({})).unwrap_err();
        assert!(err.contains("city"));
    }
}
