//! Mutable per-chat stream state and its rendering.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::bus::{StreamEvent, StreamEventKind};

/// Part id used when deltas arrive without an explicit `text-start`.
const FALLBACK_PART_ID: &str = "main";

/// How many tool calls the live snapshot shows before collapsing into a
/// "… and N more" line.
const MAX_VISIBLE_TOOLS: usize = 3;

const MAX_INPUT_PREVIEW: usize = 200;
const MAX_OUTPUT_PREVIEW: usize = 150;

/// Lifecycle of a tool invocation as seen by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    fn glyph(self) -> &'static str {
        match self {
            Self::Pending => "⏳",
            Self::Running => "🔄",
            Self::Completed => "✅",
            Self::Error => "❌",
        }
    }
}

/// A tool invocation fragment of the in-progress output.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub status: ToolStatus,
    pub input: serde_json::Value,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// An addressable fragment of the assistant's in-progress output.
#[derive(Debug, Clone)]
pub enum Part {
    Text(String),
    Tool(ToolInvocation),
}

struct StateInner {
    parts: HashMap<String, Part>,
    /// Part ids in insertion order; used for the longest-text tie-break.
    part_order: Vec<String>,
    /// Tool call ids in insertion order; used for "most recent N" display.
    tool_order: Vec<String>,
    current_text: Option<String>,
    iteration: u32,
    last_update: Instant,
    last_render: Option<Instant>,
}

/// Aggregated stream state for one chat.
///
/// Every operation takes the interior lock: event ingestion and timer-driven
/// rendering race on the same instance by design.
pub struct StreamState {
    inner: RwLock<StateInner>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StateInner {
                parts: HashMap::new(),
                part_order: Vec::new(),
                tool_order: Vec::new(),
                current_text: None,
                iteration: 0,
                last_update: Instant::now(),
                last_render: None,
            }),
        }
    }

    /// Consolidate one event into the state. Terminal events are a no-op
    /// here; the owning map entry is removed by the consumer after this call.
    pub fn apply(&self, event: &StreamEvent) {
        let mut inner = self.inner.write().expect("stream state poisoned");
        if event.iteration > inner.iteration {
            inner.iteration = event.iteration;
        }
        match &event.kind {
            StreamEventKind::Start | StreamEventKind::TextEnd { .. } => {}
            StreamEventKind::TextStart { part_id } => {
                inner.insert_part(part_id.clone(), Part::Text(String::new()));
                inner.current_text = Some(part_id.clone());
            }
            StreamEventKind::TextDelta { part_id, text } => {
                let target = if inner.parts.contains_key(part_id) {
                    part_id.clone()
                } else {
                    // Providers that never emit text-start land in "main".
                    if !inner.parts.contains_key(FALLBACK_PART_ID) {
                        inner.insert_part(
                            FALLBACK_PART_ID.to_string(),
                            Part::Text(String::new()),
                        );
                        if inner.current_text.is_none() {
                            inner.current_text = Some(FALLBACK_PART_ID.to_string());
                        }
                    }
                    FALLBACK_PART_ID.to_string()
                };
                if let Some(Part::Text(buf)) = inner.parts.get_mut(&target) {
                    buf.push_str(text);
                }
                inner.last_update = Instant::now();
            }
            StreamEventKind::ToolCall {
                call_id,
                name,
                arguments,
            } => {
                inner.insert_part(
                    call_id.clone(),
                    Part::Tool(ToolInvocation {
                        call_id: call_id.clone(),
                        name: name.clone(),
                        status: ToolStatus::Running,
                        input: arguments.clone(),
                        output: None,
                        error: None,
                    }),
                );
                inner.tool_order.push(call_id.clone());
                inner.last_update = Instant::now();
            }
            StreamEventKind::ToolResult { call_id, output, .. } => {
                if let Some(Part::Tool(tool)) = inner.parts.get_mut(call_id) {
                    tool.status = ToolStatus::Completed;
                    tool.output = Some(output.clone());
                    inner.last_update = Instant::now();
                }
            }
            StreamEventKind::ToolError { call_id, error } => {
                if let Some(Part::Tool(tool)) = inner.parts.get_mut(call_id) {
                    tool.status = ToolStatus::Error;
                    tool.error = Some(error.clone());
                    inner.last_update = Instant::now();
                }
            }
            StreamEventKind::Finish | StreamEventKind::Error { .. } => {}
        }
    }

    /// Whether a live render is due, given the throttle interval. The caller
    /// still flushes terminal renders unconditionally.
    pub fn should_render(&self, interval: Duration) -> bool {
        let inner = self.inner.read().expect("stream state poisoned");
        match inner.last_render {
            None => true,
            Some(at) => at.elapsed() >= interval,
        }
    }

    pub fn mark_rendered(&self) {
        let mut inner = self.inner.write().expect("stream state poisoned");
        inner.last_render = Some(Instant::now());
    }

    /// Build the live snapshot: step marker, the most recent tool calls with
    /// input/output previews, then the current (or longest) text.
    pub fn render_snapshot(&self) -> String {
        let inner = self.inner.read().expect("stream state poisoned");
        let mut blocks: Vec<String> = Vec::new();

        if inner.iteration > 0 {
            blocks.push(format!("🔄 Step {}", inner.iteration));
        }

        let shown = inner.tool_order.len().min(MAX_VISIBLE_TOOLS);
        for call_id in &inner.tool_order[inner.tool_order.len() - shown..] {
            let Some(Part::Tool(tool)) = inner.parts.get(call_id) else {
                continue;
            };
            let mut block = format!("🔧 {} {}", tool.name, tool.status.glyph());
            if !tool.input.is_null() && tool.input.as_object().map_or(true, |o| !o.is_empty()) {
                let pretty = serde_json::to_string_pretty(&tool.input)
                    .unwrap_or_else(|_| tool.input.to_string());
                block.push_str("\n```\nInput:\n");
                block.push_str(&truncate(&pretty, MAX_INPUT_PREVIEW));
                block.push_str("\n```");
            }
            if let Some(output) = tool.output.as_deref().filter(|o| !o.is_empty()) {
                block.push_str("\n```\nOutput:\n");
                block.push_str(&truncate(output, MAX_OUTPUT_PREVIEW));
                block.push_str("\n```");
            }
            if let Some(error) = tool.error.as_deref().filter(|e| !e.is_empty()) {
                block.push_str("\n```\nError:\n");
                block.push_str(&truncate(error, MAX_OUTPUT_PREVIEW));
                block.push_str("\n```");
            }
            blocks.push(block);
        }
        if inner.tool_order.len() > MAX_VISIBLE_TOOLS {
            blocks.push(format!(
                "📋 ... and {} more",
                inner.tool_order.len() - MAX_VISIBLE_TOOLS
            ));
        }

        let text = inner.best_text();
        if !text.is_empty() {
            if !blocks.is_empty() {
                blocks.push(String::new());
            }
            blocks.push(text);
        }

        blocks.join("\n")
    }

    /// The terminal message text: the current text part, falling back to the
    /// longest text part when start/end bookkeeping was never observed. Tool
    /// blocks never appear here.
    pub fn final_text(&self) -> String {
        let inner = self.inner.read().expect("stream state poisoned");
        inner.best_text()
    }

    pub fn iteration(&self) -> u32 {
        self.inner.read().expect("stream state poisoned").iteration
    }

    /// Time since the last applied event.
    pub fn idle_for(&self) -> Duration {
        self.inner
            .read()
            .expect("stream state poisoned")
            .last_update
            .elapsed()
    }
}

impl StateInner {
    fn insert_part(&mut self, id: String, part: Part) {
        if !self.parts.contains_key(&id) {
            self.part_order.push(id.clone());
        }
        self.parts.insert(id, part);
    }

    /// Current text, or the longest text part (first-encountered wins ties).
    /// The true answer is rarely shorter than any intermediate partial.
    fn best_text(&self) -> String {
        if let Some(id) = &self.current_text {
            if let Some(Part::Text(text)) = self.parts.get(id) {
                if !text.is_empty() {
                    return text.clone();
                }
            }
        }
        let mut best = "";
        for id in &self.part_order {
            if let Some(Part::Text(text)) = self.parts.get(id) {
                if text.len() > best.len() {
                    best = text;
                }
            }
        }
        best.to_string()
    }
}

/// Char-boundary-safe prefix with an ellipsis marker past `max` chars.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(kind: StreamEventKind) -> StreamEvent {
        StreamEvent::new("term", "1", "term:1", kind)
    }

    fn tool_call(id: &str, name: &str) -> StreamEvent {
        event(StreamEventKind::ToolCall {
            call_id: id.to_string(),
            name: name.to_string(),
            arguments: serde_json::json!({"path": "/tmp"}),
        })
    }

    #[test]
    fn deltas_concatenate_in_order() {
        let state = StreamState::new();
        state.apply(&event(StreamEventKind::TextStart {
            part_id: "main".into(),
        }));
        for chunk in ["Hello", ", ", "world", "!"] {
            state.apply(&event(StreamEventKind::TextDelta {
                part_id: "main".into(),
                text: chunk.into(),
            }));
        }
        assert_eq!(state.final_text(), "Hello, world!");
    }

    #[test]
    fn deltas_without_text_start_fall_back_to_main() {
        let state = StreamState::new();
        state.apply(&event(StreamEventKind::TextDelta {
            part_id: "p-77".into(),
            text: "no start".into(),
        }));
        assert_eq!(state.final_text(), "no start");
    }

    #[test]
    fn longest_text_part_wins_without_current_pointer() {
        let state = StreamState::new();
        // Two parts accumulated through the fallback-free path.
        state.apply(&event(StreamEventKind::TextStart { part_id: "a".into() }));
        state.apply(&event(StreamEventKind::TextDelta {
            part_id: "a".into(),
            text: "short".into(),
        }));
        state.apply(&event(StreamEventKind::TextStart { part_id: "b".into() }));
        state.apply(&event(StreamEventKind::TextDelta {
            part_id: "b".into(),
            text: "".into(),
        }));
        // Current points at the empty "b"; the longest fallback kicks in.
        assert_eq!(state.final_text(), "short");
    }

    #[test]
    fn snapshot_caps_tool_calls_at_three_with_summary() {
        let state = StreamState::new();
        for i in 0..4 {
            state.apply(&tool_call(&format!("call-{i}"), &format!("tool_{i}")));
        }
        let snapshot = state.render_snapshot();
        assert!(!snapshot.contains("tool_0"), "oldest call should be hidden");
        assert!(snapshot.contains("tool_1"));
        assert!(snapshot.contains("tool_3"));
        assert!(snapshot.contains("... and 1 more"));
    }

    #[test]
    fn tool_lifecycle_updates_status_and_output() {
        let state = StreamState::new();
        state.apply(&tool_call("call-1", "list_files"));
        assert!(state.render_snapshot().contains("🔄"));
        state.apply(&event(StreamEventKind::ToolResult {
            call_id: "call-1".into(),
            name: "list_files".into(),
            output: "a.txt\nb.txt".into(),
        }));
        let snapshot = state.render_snapshot();
        assert!(snapshot.contains("✅"));
        assert!(snapshot.contains("a.txt"));
    }

    #[test]
    fn unknown_tool_result_is_ignored() {
        let state = StreamState::new();
        state.apply(&event(StreamEventKind::ToolResult {
            call_id: "ghost".into(),
            name: "x".into(),
            output: "out".into(),
        }));
        assert_eq!(state.render_snapshot(), "");
    }

    #[test]
    fn final_text_excludes_tool_blocks() {
        let state = StreamState::new();
        state.apply(&tool_call("call-1", "list_files"));
        state.apply(&event(StreamEventKind::TextDelta {
            part_id: "main".into(),
            text: "Here are the files".into(),
        }));
        assert_eq!(state.final_text(), "Here are the files");
        assert!(state.render_snapshot().contains("list_files"));
    }

    #[test]
    fn long_previews_are_truncated() {
        let state = StreamState::new();
        state.apply(&event(StreamEventKind::ToolCall {
            call_id: "c".into(),
            name: "shell".into(),
            arguments: serde_json::json!({"cmdline": "x".repeat(400)}),
        }));
        state.apply(&event(StreamEventKind::ToolResult {
            call_id: "c".into(),
            name: "shell".into(),
            output: "y".repeat(400),
        }));
        let snapshot = state.render_snapshot();
        let input_len = snapshot.matches('x').count();
        let output_len = snapshot.matches('y').count();
        assert!(input_len <= 200);
        assert!(output_len <= 150);
    }

    #[test]
    fn render_throttle_allows_first_then_waits() {
        let state = StreamState::new();
        let interval = Duration::from_millis(500);
        assert!(state.should_render(interval));
        state.mark_rendered();
        assert!(!state.should_render(interval));
    }

    #[test]
    fn step_marker_appears_after_first_iteration() {
        let state = StreamState::new();
        state.apply(&event(StreamEventKind::Start).with_iteration(2));
        assert!(state.render_snapshot().contains("Step 2"));
    }
}
