//! Conversation sessions: the main agent loop and the per-key session map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{InboundMessage, MessageBus, StreamEvent, StreamEventKind};
use crate::error::{PalaverError, Result};
use crate::provider::{ChatRequest, FinishReason, ModelProvider, ResponseEvent};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{ChatMessage, ToolCall};

/// Iteration cap applied when none is configured.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Per-session knobs shared by the manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_iterations: u32,
    pub max_tokens: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: None,
        }
    }
}

/// One conversation: ordered history plus the loop that advances it.
///
/// The history lock is held across the whole [`Session::process`] call, so
/// concurrent messages for the same session key queue up instead of
/// interleaving.
pub struct Session {
    key: String,
    bus: Arc<MessageBus>,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    config: SessionConfig,
    messages: Mutex<Vec<ChatMessage>>,
}

impl Session {
    pub fn new(
        key: impl Into<String>,
        bus: Arc<MessageBus>,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        config: SessionConfig,
    ) -> Self {
        Self {
            key: key.into(),
            bus,
            provider,
            tools,
            config,
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Run one turn: append the user message, then loop model calls and tool
    /// executions until the model stops asking for tools or the iteration cap
    /// is hit. Returns the final assistant text.
    ///
    /// Progress is published as stream events throughout; a `finish` event
    /// follows a successful turn, an `error` event any failed one. Failures
    /// abort the turn, never the session.
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        inbound: &InboundMessage,
    ) -> Result<String> {
        let mut messages = self.messages.lock().await;

        info!(session = %self.key, "processing message");
        self.emit(inbound, StreamEventKind::Start, 0).await?;

        if messages.is_empty() && !self.config.system_prompt.is_empty() {
            messages.push(ChatMessage::system(&self.config.system_prompt));
        }
        messages.push(ChatMessage::user(&inbound.content));

        match self.run_loop(cancel, inbound, &mut messages).await {
            Ok(text) => {
                self.emit(inbound, StreamEventKind::Finish, 0).await?;
                Ok(text)
            }
            Err(err) => {
                warn!(session = %self.key, error = %err, "turn failed");
                // A closed bus must not mask the turn's own error.
                let _ = self
                    .emit(
                        inbound,
                        StreamEventKind::Error {
                            message: err.to_string(),
                        },
                        0,
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn run_loop(
        &self,
        cancel: &CancellationToken,
        inbound: &InboundMessage,
        messages: &mut Vec<ChatMessage>,
    ) -> Result<String> {
        let ctx = ToolContext::new(&inbound.channel, &inbound.chat_id)
            .with_bus(Arc::clone(&self.bus));

        for iteration in 1..=self.config.max_iterations {
            debug!(session = %self.key, iteration, "loop iteration");
            self.emit(inbound, StreamEventKind::Start, iteration).await?;

            let request = ChatRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                tools: self.tools.definitions(),
                max_tokens: self.config.max_tokens,
            };

            let stream = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled()),
                stream = self.provider.send_stream(&request) => stream?,
            };

            // Each iteration gets its own text part; the renderer's
            // current-text pointer follows the latest one.
            let part_id = if iteration == 1 {
                "main".to_string()
            } else {
                format!("main-{iteration}")
            };
            let mut part_started = false;
            let mut text = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut finish = FinishReason::Stop;

            futures::pin_mut!(stream);
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled()),
                    event = stream.next() => event,
                };
                match event {
                    Some(Ok(ResponseEvent::TextDelta(delta))) => {
                        if !part_started {
                            part_started = true;
                            self.emit(
                                inbound,
                                StreamEventKind::TextStart {
                                    part_id: part_id.clone(),
                                },
                                iteration,
                            )
                            .await?;
                        }
                        text.push_str(&delta);
                        self.emit(
                            inbound,
                            StreamEventKind::TextDelta {
                                part_id: part_id.clone(),
                                text: delta,
                            },
                            iteration,
                        )
                        .await?;
                    }
                    Some(Ok(ResponseEvent::ToolCall(call))) => tool_calls.push(call),
                    Some(Ok(ResponseEvent::Finish(reason))) => finish = reason,
                    Some(Err(err)) => return Err(err),
                    None => break,
                }
            }
            if part_started {
                self.emit(
                    inbound,
                    StreamEventKind::TextEnd {
                        part_id: part_id.clone(),
                    },
                    iteration,
                )
                .await?;
            }

            messages.push(ChatMessage::assistant(text.clone(), tool_calls.clone()));

            if finish != FinishReason::ToolCalls || tool_calls.is_empty() {
                debug!(session = %self.key, iteration, "turn complete");
                return Ok(text);
            }

            for call in &tool_calls {
                self.execute_tool(cancel, inbound, &ctx, call, iteration, messages)
                    .await?;
            }
        }

        Err(PalaverError::IterationLimit(self.config.max_iterations))
    }

    async fn execute_tool(
        &self,
        cancel: &CancellationToken,
        inbound: &InboundMessage,
        ctx: &ToolContext,
        call: &ToolCall,
        iteration: u32,
        messages: &mut Vec<ChatMessage>,
    ) -> Result<()> {
        let arguments = call
            .parsed_arguments()
            .unwrap_or(serde_json::Value::Null);
        self.emit(
            inbound,
            StreamEventKind::ToolCall {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments,
            },
            iteration,
        )
        .await?;

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            result = self.tools.execute(&call.name, &call.arguments, ctx) => result,
        };

        let kind = if result.is_error {
            StreamEventKind::ToolError {
                call_id: call.id.clone(),
                error: result.content.clone(),
            }
        } else {
            StreamEventKind::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                output: result.content.clone(),
            }
        };
        self.emit(inbound, kind, iteration).await?;

        let content = if result.is_error {
            format!("Error: {}", result.content)
        } else {
            result.content
        };
        messages.push(ChatMessage::tool_result(call.id.clone(), content));
        Ok(())
    }

    async fn emit(
        &self,
        inbound: &InboundMessage,
        kind: StreamEventKind,
        iteration: u32,
    ) -> Result<()> {
        self.bus
            .publish_stream(
                StreamEvent::new(&inbound.channel, &inbound.chat_id, &self.key, kind)
                    .with_iteration(iteration),
            )
            .await
    }

    /// Drop the conversation history.
    pub async fn clear(&self) {
        self.messages.lock().await.clear();
    }

    /// Snapshot of the history, used by tests and admin surfaces.
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.messages.lock().await.clone()
    }
}

fn cancelled() -> PalaverError {
    PalaverError::Stream("turn cancelled".to_string())
}

/// Session-key → session map shared by the inbound workers.
pub struct SessionManager {
    bus: Arc<MessageBus>,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    config: SessionConfig,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        config: SessionConfig,
    ) -> Self {
        Self {
            bus,
            provider,
            tools,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get the session for a key, creating it on first use. Atomic under one
    /// write lock.
    pub fn get_or_create(&self, key: &str) -> Arc<Session> {
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        sessions
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Session::new(
                    key,
                    Arc::clone(&self.bus),
                    Arc::clone(&self.provider),
                    Arc::clone(&self.tools),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().expect("session lock poisoned");
        sessions.get(key).cloned()
    }

    /// Reset one session's history; a no-op for unknown keys.
    pub async fn clear(&self, key: &str) {
        let session = self.get(key);
        if let Some(session) = session {
            session.clear().await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
