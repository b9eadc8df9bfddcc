//! Tool trait, approvals, and execution results.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::MessageBus;
use crate::error::Result;

/// A human-confirmation request raised before a tool executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub justification: String,
    pub what: String,
}

impl Approval {
    pub fn new(justification: impl Into<String>, what: impl Into<String>) -> Self {
        Self {
            justification: justification.into(),
            what: what.into(),
        }
    }
}

/// Outcome of a tool execution. Errors are in-band so the model can read
/// them and self-correct on the next iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Where a tool call is executing: which channel and chat asked for it, and
/// the bus for tools that publish messages themselves.
#[derive(Clone, Default)]
pub struct ToolContext {
    pub channel: String,
    pub chat_id: String,
    pub bus: Option<Arc<MessageBus>>,
}

impl ToolContext {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }
}

/// An invocable capability: name, JSON-schema argument contract, optional
/// approval gate, and an execute operation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable description advertised to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments.
    fn parameters(&self) -> serde_json::Value;

    /// Optional confirmation gate; `None` means no confirmation needed.
    fn make_approval(&self, _args: &serde_json::Value) -> Option<Approval> {
        None
    }

    /// Execute with parsed arguments. `Err` is reserved for infrastructure
    /// failures; expected failures return an error-flagged [`ToolResult`].
    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult>;
}
