//! Channel adapters: the surface trait, outbound dispatch, and the stream
//! consumer that turns events into throttled renders.

pub mod terminal;

pub use terminal::TerminalChannel;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, OutboundMessage, StreamEvent, StreamEventKind};
use crate::error::Result;
use crate::stream::StreamStateMap;

/// Default live-render throttle.
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(500);

/// Entries older than this are reclaimed by the idle sweep.
const IDLE_SWEEP_AGE: Duration = Duration::from_secs(300);
const IDLE_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// A messaging surface the agent talks through.
///
/// Adapters publish inbound messages onto the bus from `start` and receive
/// outbound messages and live renders back. The edit-vs-resend policy for
/// progressive output lives inside `render`.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving. Implementations spawn their own reader task and
    /// return immediately.
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Deliver a complete message.
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Push an in-progress (or, with `finished`, final) view of a streaming
    /// turn for one chat.
    async fn render(&self, chat_id: &str, content: &str, finished: bool) -> Result<()>;

    /// Whether a sender may talk to the agent.
    fn is_allowed(&self, sender_id: &str, username: &str) -> bool;
}

/// Match a sender against an allow-list.
///
/// An empty list allows everyone. Each entry may be a sender id, a username
/// (leading `@` and case ignored), or an `id|username` composite where either
/// side matching passes.
pub fn allow_list_matches(allow: &[String], sender_id: &str, username: &str) -> bool {
    if allow.is_empty() {
        return true;
    }
    let username = username.trim_start_matches('@').to_lowercase();
    allow.iter().any(|entry| {
        entry.split('|').any(|part| {
            let part = part.trim();
            part == sender_id
                || (!username.is_empty()
                    && part.trim_start_matches('@').to_lowercase() == username)
        })
    })
}

/// The set of registered channels plus the two consumer loops that feed them:
/// outbound dispatch and stream rendering.
pub struct ChannelSet {
    bus: Arc<MessageBus>,
    channels: HashMap<String, Arc<dyn Channel>>,
    states: StreamStateMap,
    render_interval: Duration,
}

impl ChannelSet {
    pub fn new(bus: Arc<MessageBus>, render_interval: Duration) -> Self {
        Self {
            bus,
            channels: HashMap::new(),
            states: StreamStateMap::new(),
            render_interval,
        }
    }

    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    pub async fn start_all(&self) -> Result<()> {
        for channel in self.channels.values() {
            info!(channel = channel.name(), "starting channel");
            channel.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        for channel in self.channels.values() {
            if let Err(err) = channel.stop().await {
                warn!(channel = channel.name(), error = %err, "channel stop failed");
            }
        }
    }

    /// Drive both consumer loops until `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) {
        tokio::join!(self.run_outbound(cancel), self.run_stream(cancel));
    }

    /// Deliver outbound messages to their channel.
    pub async fn run_outbound(&self, cancel: &CancellationToken) {
        while let Some(message) = self.bus.consume_outbound(cancel).await {
            let Some(channel) = self.get(&message.channel) else {
                warn!(channel = %message.channel, "outbound for unknown channel");
                continue;
            };
            if let Err(err) = channel.send(&message).await {
                warn!(channel = %message.channel, error = %err, "outbound send failed");
            }
        }
    }

    /// Aggregate stream events per chat and push throttled renders. Terminal
    /// events always flush and evict the chat's state.
    pub async fn run_stream(&self, cancel: &CancellationToken) {
        let mut sweep = tokio::time::interval(IDLE_SWEEP_PERIOD);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            let event = tokio::select! {
                event = self.bus.consume_stream(cancel) => match event {
                    Some(event) => event,
                    None => return,
                },
                _ = sweep.tick() => {
                    let swept = self.states.sweep_idle(IDLE_SWEEP_AGE);
                    if swept > 0 {
                        debug!(swept, "reclaimed idle stream state");
                    }
                    continue;
                }
            };
            self.handle_stream_event(&event).await;
        }
    }

    async fn handle_stream_event(&self, event: &StreamEvent) {
        let Some(channel) = self.get(&event.channel) else {
            return;
        };

        if event.is_terminal() {
            let Some(state) = self.states.remove(&event.session_key) else {
                return;
            };
            let content = match &event.kind {
                StreamEventKind::Error { message } => format!("❌ {message}"),
                _ => state.final_text(),
            };
            if content.is_empty() {
                return;
            }
            if let Err(err) = channel.render(&event.chat_id, &content, true).await {
                warn!(channel = %event.channel, error = %err, "final render failed");
            }
            return;
        }

        let state = self.states.load_or_create(&event.session_key);
        state.apply(event);

        if !state.should_render(self.render_interval) {
            return;
        }
        let snapshot = state.render_snapshot();
        if snapshot.is_empty() {
            return;
        }
        match channel.render(&event.chat_id, &snapshot, false).await {
            Ok(()) => state.mark_rendered(),
            Err(err) => warn!(channel = %event.channel, error = %err, "render failed"),
        }
    }

    /// Number of chats with live stream state.
    pub fn active_streams(&self) -> usize {
        self.states.len()
    }
}
