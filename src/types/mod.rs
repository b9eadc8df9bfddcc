//! Shared data types.

pub mod message;

pub use message::{ChatMessage, Role, ToolCall, ToolDefinition};
