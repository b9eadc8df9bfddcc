//! Polymorphic tool dispatch: trait, registry, and built-in tools.

pub mod builtin;
pub mod memory;
pub mod spawn;
pub mod tool;
pub mod web;

pub use builtin::{ListFilesTool, MessageTool, ReadFileTool, ShellTool, ThinkTool, WriteFileTool};
pub use memory::{MemoryForgetTool, MemoryRecallTool, MemoryStoreTool};
pub use spawn::SpawnTool;
pub use tool::{Approval, Tool, ToolContext, ToolResult};
pub use web::{WebFetchTool, WebSearchTool};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::types::ToolDefinition;

/// Name → tool instance mapping.
///
/// Populated once at startup and treated as read-only thereafter; concurrent
/// registration after startup is unsupported.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions advertised to the model, sorted by name for a stable
    /// request shape.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Build the approval request for a named tool, if it wants one.
    pub fn make_approval(&self, name: &str, args: &serde_json::Value) -> Option<Approval> {
        self.get(name)?.make_approval(args)
    }

    /// Execute a tool by name. Unknown names and malformed arguments yield
    /// error-flagged results rather than errors: both are fed back to the
    /// model as something it can correct.
    pub async fn execute(&self, name: &str, raw_args: &str, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(format!("unknown tool: {name}"));
        };

        let args = if raw_args.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(raw_args) {
                Ok(value) => value,
                Err(err) => return ToolResult::error(format!("invalid arguments: {err}")),
            }
        };

        debug!(tool = name, "executing tool");
        match tool.execute(args, ctx).await {
            Ok(result) => result,
            Err(err) => ToolResult::error(format!("Error executing tool: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input"
        }

        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(
            &self,
            args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> crate::error::Result<ToolResult> {
            Ok(ToolResult::ok(
                args["text"].as_str().unwrap_or_default().to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute("nope", "{}", &ToolContext::default())
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn malformed_arguments_yield_error_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let result = registry
            .execute("echo", "{not json", &ToolContext::default())
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("invalid arguments"));
    }

    #[tokio::test]
    async fn empty_arguments_parse_as_empty_object() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let result = registry.execute("echo", "", &ToolContext::default()).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "");
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(builtin::ThinkTool));
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[1].name, "think");
    }
}
