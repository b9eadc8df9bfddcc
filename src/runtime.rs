//! Wires the pieces into a running agent: bus, provider, tools, memory,
//! sessions, and channels.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::channel::{ChannelSet, TerminalChannel};
use crate::config::Config;
use crate::error::{PalaverError, Result};
use crate::memory::{Memory, SqliteMemory};
use crate::provider::{ModelProvider, OpenAiProvider};
use crate::session::{SessionConfig, SessionManager};
use crate::subagent::SubagentManager;
use crate::tools::{
    ListFilesTool, MemoryForgetTool, MemoryRecallTool, MemoryStoreTool, MessageTool,
    ReadFileTool, ShellTool, SpawnTool, ThinkTool, ToolRegistry, WebFetchTool, WebSearchTool,
    WriteFileTool,
};

/// A fully wired agent process.
pub struct Runtime {
    config: Config,
    bus: Arc<MessageBus>,
    sessions: Arc<SessionManager>,
    channels: ChannelSet,
    cancel: CancellationToken,
}

impl Runtime {
    /// Build everything from config. Fails fast on invalid config or an
    /// unopenable memory database.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let bus = Arc::new(MessageBus::new());

        let provider: Arc<dyn ModelProvider> = Arc::new(OpenAiProvider::new(
            config.provider.base_url.clone(),
            config.provider.api_key.clone(),
        ));

        let data_dir = crate::config::data_dir().ok_or_else(|| {
            PalaverError::Configuration("cannot determine data directory".to_string())
        })?;
        let memory: Arc<dyn Memory> = Arc::new(SqliteMemory::open(&data_dir)?);

        let tools = Arc::new(build_registry(
            Arc::clone(&provider),
            &config,
            Arc::clone(&memory),
            cancel.clone(),
        ));

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&bus),
            provider,
            tools,
            SessionConfig {
                model: config.provider.model.clone(),
                system_prompt: config.agent.system_prompt.clone(),
                max_iterations: config.agent.max_iterations,
                max_tokens: config.provider.max_tokens,
            },
        ));

        let mut channels = ChannelSet::new(
            Arc::clone(&bus),
            Duration::from_millis(config.agent.render_interval_ms),
        );
        channels.register(Arc::new(TerminalChannel::new(
            Arc::clone(&bus),
            cancel.clone(),
            config.channel.allow_from.clone(),
        )));

        Ok(Self {
            config,
            bus,
            sessions,
            channels,
            cancel,
        })
    }

    /// Run until interrupted: channels feed the bus, inbound messages become
    /// session turns, outbound messages and stream renders flow back.
    pub async fn run(&self) -> Result<()> {
        info!(model = %self.config.provider.model, "starting agent");
        self.channels.start_all().await?;

        let inbound = self.run_inbound(self.cancel.clone());
        let consumers = self.channels.run(&self.cancel);
        let shutdown = async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
            }
            self.cancel.cancel();
        };

        tokio::join!(inbound, consumers, shutdown);

        self.channels.stop_all().await;
        self.bus.close().await;
        Ok(())
    }

    /// Dispatch inbound messages to sessions. Each message runs in its own
    /// task, so independent sessions overlap while the per-session lock keeps
    /// one conversation serialized.
    async fn run_inbound(&self, cancel: CancellationToken) {
        while let Some(message) = self.bus.consume_inbound(&cancel).await {
            if !self.sender_allowed(&message) {
                warn!(
                    channel = %message.channel,
                    sender = %message.sender_id,
                    "sender not in allow list, dropping message"
                );
                continue;
            }
            let sessions = Arc::clone(&self.sessions);
            let bus = Arc::clone(&self.bus);
            let token = cancel.clone();
            tokio::spawn(async move {
                process_inbound(sessions, bus, token, message).await;
            });
        }
    }

    fn sender_allowed(&self, message: &InboundMessage) -> bool {
        let Some(channel) = self.channels.get(&message.channel) else {
            return false;
        };
        let username = message
            .metadata
            .get("username")
            .map(String::as_str)
            .unwrap_or("");
        channel.is_allowed(&message.sender_id, username)
    }

    /// One-shot turn used by `palaver ask`: no channels, just the session.
    pub async fn ask(&self, prompt: &str) -> Result<String> {
        let message = InboundMessage::new("terminal", "user", "oneshot", prompt);
        let session = self.sessions.get_or_create(&message.session_key);

        // Nothing renders stream events in one-shot mode, so drain them
        // here: the session publishes one event per delta and would block
        // once the bounded stream queue fills.
        let drain_token = CancellationToken::new();
        let drain = {
            let bus = Arc::clone(&self.bus);
            let token = drain_token.clone();
            tokio::spawn(async move { while bus.consume_stream(&token).await.is_some() {} })
        };

        let result = session.process(&self.cancel, &message).await;
        drain_token.cancel();
        let _ = drain.await;
        result
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }
}

async fn process_inbound(
    sessions: Arc<SessionManager>,
    bus: Arc<MessageBus>,
    cancel: CancellationToken,
    message: InboundMessage,
) {
    let session = sessions.get_or_create(&message.session_key);
    match session.process(&cancel, &message).await {
        Ok(text) => {
            // Streaming chats already saw the final render; everyone else
            // gets the reply as a plain outbound message.
            if !message.stream_mode && !text.is_empty() {
                let outbound = OutboundMessage {
                    channel: message.channel.clone(),
                    chat_id: message.chat_id.clone(),
                    content: text,
                    media: Vec::new(),
                };
                if let Err(err) = bus.publish_outbound(outbound).await {
                    warn!(error = %err, "failed to publish reply");
                }
            }
        }
        Err(err) => {
            warn!(session = %message.session_key, error = %err, "turn failed");
            if err.is_fatal() {
                cancel.cancel();
                return;
            }
            // Streaming chats see the error through the final render; plain
            // chats get it as a tagged outbound message.
            if !message.stream_mode {
                let notice = OutboundMessage {
                    channel: message.channel.clone(),
                    chat_id: message.chat_id.clone(),
                    content: format!("❌ {err}"),
                    media: Vec::new(),
                };
                let _ = bus.publish_outbound(notice).await;
            }
        }
    }
}

/// All built-in tools, wired to their collaborators.
fn build_registry(
    provider: Arc<dyn ModelProvider>,
    config: &Config,
    memory: Arc<dyn Memory>,
    cancel: CancellationToken,
) -> ToolRegistry {
    // Subagents get the same tool set as the parent session, minus spawn
    // itself so fan-out cannot recurse.
    let subagent_tools = Arc::new(shared_tools(&memory));
    let manager = Arc::new(
        SubagentManager::new(
            provider,
            config.provider.model.clone(),
            subagent_tools,
        )
        .with_max_iterations(config.agent.subagent_max_iterations),
    );

    let mut registry = shared_tools(&memory);
    registry.register(Arc::new(SpawnTool::new(manager, cancel)));
    registry
}

/// The tool set common to the parent session and its subagents.
fn shared_tools(memory: &Arc<dyn Memory>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ShellTool));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(ListFilesTool));
    registry.register(Arc::new(ThinkTool));
    registry.register(Arc::new(MessageTool));
    registry.register(Arc::new(WebSearchTool::new()));
    registry.register(Arc::new(WebFetchTool));
    registry.register(Arc::new(MemoryStoreTool::new(Arc::clone(memory))));
    registry.register(Arc::new(MemoryRecallTool::new(Arc::clone(memory))));
    registry.register(Arc::new(MemoryForgetTool::new(Arc::clone(memory))));
    registry
}
