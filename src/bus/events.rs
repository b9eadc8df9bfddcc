//! Message and stream event types carried by the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message arriving from a channel adapter, consumed once by a session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    pub session_key: String,
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub metadata: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub stream_mode: bool,
}

impl InboundMessage {
    /// Build a message with the composite `channel:chat` session key.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let channel = channel.into();
        let chat_id = chat_id.into();
        Self {
            session_key: format!("{channel}:{chat_id}"),
            channel,
            sender_id: sender_id.into(),
            chat_id,
            content: content.into(),
            ..Default::default()
        }
    }
}

/// A message bound for a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
}

/// Kind-specific payload of a streaming progress event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventKind {
    /// A turn (or one loop iteration, when `iteration > 0`) has begun.
    Start,
    /// A new text part opened; subsequent deltas reference `part_id`.
    TextStart { part_id: String },
    /// Incremental assistant text.
    TextDelta { part_id: String, text: String },
    /// The text part is complete.
    TextEnd { part_id: String },
    /// The model requested a tool invocation.
    ToolCall {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// A tool invocation completed successfully.
    ToolResult {
        call_id: String,
        name: String,
        output: String,
    },
    /// A tool invocation failed.
    ToolError { call_id: String, error: String },
    /// Terminal: the turn completed.
    Finish,
    /// Terminal: the turn failed.
    Error { message: String },
}

/// One unit of streaming progress for a single chat.
///
/// Events for a given chat are observed by any single consumer in publish
/// order; all of them funnel through one bounded queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub channel: String,
    pub chat_id: String,
    pub session_key: String,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        session_key: impl Into<String>,
        kind: StreamEventKind,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            session_key: session_key.into(),
            iteration: 0,
            timestamp: None,
            kind,
        }
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    /// Whether this event ends the stream for its chat.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            StreamEventKind::Finish | StreamEventKind::Error { .. }
        )
    }
}
