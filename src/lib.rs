//! Palaver: a streaming conversational agent runtime.
//!
//! Channels feed user messages onto a bounded [`bus`], sessions run the
//! model/tool loop and publish progress as stream events, and channel
//! adapters aggregate those events into live, throttled renders. Subagents
//! fan independent tasks out concurrently, and a SQLite-backed memory gives
//! the agent durable recall.

pub mod bus;
pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod memory;
pub mod provider;
pub mod runtime;
pub mod session;
pub mod stream;
pub mod subagent;
pub mod tools;
pub mod types;

pub use bus::{InboundMessage, MessageBus, OutboundMessage, StreamEvent, StreamEventKind};
pub use config::Config;
pub use error::{PalaverError, Result};
pub use provider::{ChatRequest, ChatResponse, ModelProvider, OpenAiProvider, ResponseEvent};
pub use runtime::Runtime;
pub use session::{Session, SessionConfig, SessionManager};
pub use stream::{StreamState, StreamStateMap};
pub use subagent::{SubagentManager, SubagentResult, SubagentTask};
pub use tools::{Tool, ToolContext, ToolRegistry, ToolResult};
pub use types::{ChatMessage, Role, ToolCall, ToolDefinition};
