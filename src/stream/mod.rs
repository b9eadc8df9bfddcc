//! Per-chat aggregation of stream events into renderable state.
//!
//! Rendering targets (channel adapters) consume `StreamEvent`s off the bus
//! and feed them into a [`StreamState`] looked up through a [`StreamStateMap`].
//! The state is independent of any concrete rendering surface; adapters only
//! decide how and when to push [`StreamState::render_snapshot`] output.

mod state;

pub use state::{Part, StreamState, ToolInvocation, ToolStatus};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Concurrent chat-key → aggregator map with atomic load-or-create.
///
/// Entries are created lazily on the first event for a chat and removed when
/// a terminal event is observed (or the owning consumer evicts them after a
/// cancelled turn).
#[derive(Default)]
pub struct StreamStateMap {
    states: RwLock<HashMap<String, Arc<StreamState>>>,
}

impl StreamStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the aggregator for `chat_key`, creating it if absent. The
    /// check-and-create is atomic under one write lock, so concurrent callers
    /// always observe the same instance.
    pub fn load_or_create(&self, chat_key: &str) -> Arc<StreamState> {
        let mut states = self.states.write().expect("stream state lock poisoned");
        states
            .entry(chat_key.to_string())
            .or_insert_with(|| Arc::new(StreamState::new()))
            .clone()
    }

    pub fn get(&self, chat_key: &str) -> Option<Arc<StreamState>> {
        let states = self.states.read().expect("stream state lock poisoned");
        states.get(chat_key).cloned()
    }

    /// Drop the aggregator for a chat, returning it for a final render.
    pub fn remove(&self, chat_key: &str) -> Option<Arc<StreamState>> {
        let mut states = self.states.write().expect("stream state lock poisoned");
        states.remove(chat_key)
    }

    /// Drop entries that have seen no events for `max_idle`. Turns that were
    /// cancelled without a terminal event are reclaimed here.
    pub fn sweep_idle(&self, max_idle: std::time::Duration) -> usize {
        let mut states = self.states.write().expect("stream state lock poisoned");
        let before = states.len();
        states.retain(|_, state| state.idle_for() < max_idle);
        before - states.len()
    }

    pub fn len(&self) -> usize {
        self.states.read().expect("stream state lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
