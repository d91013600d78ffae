use crate::orchestrator::CallOrchestrator;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use toolgate_core::{CallerIdentity, ToolCall, ToolError, ToolResult, ToolgateError, ToolgateResult};
use tracing::info;

/// An invocable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name matched against the access whitelist.
    fn name(&self) -> &str;

    /// Human-readable summary.
    fn description(&self) -> &str {
        ""
    }

    /// Run the tool. Errors are surfaced to the caller as
    /// [`ToolgateError::ExecutionFailed`] without modification.
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Named tools executed through a shared [`CallOrchestrator`].
pub struct ToolRegistry {
    guard: Arc<CallOrchestrator>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// An empty registry whose calls go through `guard`.
    pub fn new(guard: Arc<CallOrchestrator>) -> Self {
        Self {
            guard,
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any previous tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        info!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
    }

    /// The tool registered as `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The orchestrator every call runs through.
    pub fn guard(&self) -> &CallOrchestrator {
        &self.guard
    }

    /// Look up `call.name` and run it through the guard.
    ///
    /// A whitelisted name with no registered tool passes both gates and then
    /// fails with [`ToolgateError::ToolNotFound`]. Rejections surface as
    /// errors; a successful call is wrapped in a [`ToolResult`] keyed by the
    /// call id.
    pub async fn execute(
        &self,
        call: ToolCall,
        identity: &CallerIdentity,
    ) -> ToolgateResult<ToolResult> {
        let tool = self.tools.get(&call.name).cloned();
        let missing = call.name.clone();
        let value = self
            .guard
            .invoke_as(&call.name, call.arguments, identity, |args| async move {
                match tool {
                    Some(tool) => tool.call(args).await,
                    None => Err(ToolError::from(ToolgateError::ToolNotFound(missing))),
                }
            })
            .await
            .map_err(surface_not_found)?;
        Ok(ToolResult::from_value(call.id, &value))
    }
}

/// Lift a missing-tool error out of the execution wrapper.
fn surface_not_found(err: ToolgateError) -> ToolgateError {
    let ToolgateError::ExecutionFailed(source) = err else {
        return err;
    };
    match source.downcast::<ToolgateError>() {
        Ok(inner) => match *inner {
            not_found @ ToolgateError::ToolNotFound(_) => not_found,
            other => ToolgateError::ExecutionFailed(Box::new(other)),
        },
        Err(source) => ToolgateError::ExecutionFailed(source),
    }
}
