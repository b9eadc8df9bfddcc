//! Model provider trait and the OpenAI-compatible implementation.

pub mod http;
pub mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ChatMessage, ToolCall, ToolDefinition};

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
}

impl FinishReason {
    /// Map a provider's finish-reason string. Anything that is not a
    /// tool-call request terminates the loop, so unknown values fold into
    /// `Stop`.
    pub fn parse(s: &str) -> Self {
        match s {
            "tool_calls" | "tool_use" => Self::ToolCalls,
            _ => Self::Stop,
        }
    }
}

/// A request snapshot sent to a provider: full conversation plus the current
/// tool-definition set.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
}

/// One unit of streaming progress from a provider.
///
/// Tool calls are emitted whole: providers merge argument fragments
/// internally and yield each call once, before the terminal `Finish`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    TextDelta(String),
    ToolCall(ToolCall),
    Finish(FinishReason),
}

/// Ordered stream of response events.
pub type EventStream = BoxStream<'static, Result<ResponseEvent>>;

/// A language-model backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Synchronous completion.
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Streaming completion. The default adapts a synchronous-only provider
    /// by emitting its single response as one terminal burst of events.
    async fn send_stream(&self, request: &ChatRequest) -> Result<EventStream> {
        let response = self.send(request).await?;
        let mut events = Vec::with_capacity(response.tool_calls.len() + 2);
        if !response.content.is_empty() {
            events.push(Ok(ResponseEvent::TextDelta(response.content)));
        }
        for call in response.tool_calls {
            events.push(Ok(ResponseEvent::ToolCall(call)));
        }
        events.push(Ok(ResponseEvent::Finish(response.finish_reason)));
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
