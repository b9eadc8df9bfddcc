//! End-to-end turn: inbound message, tool call, tool result, final text,
//! rendered through the stream aggregator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use palaver::bus::StreamEventKind;
use palaver::provider::FinishReason;
use palaver::tools::ListFilesTool;
use palaver::{
    ChatMessage, ChatRequest, ChatResponse, InboundMessage, MessageBus, ModelProvider, Role,
    SessionConfig, SessionManager, StreamStateMap, ToolCall, ToolRegistry,
};

/// Replays a fixed script of responses and records every request it saw.
struct ScriptedProvider {
    script: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<ChatResponse>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: &ChatRequest) -> palaver::Result<ChatResponse> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted"))
    }
}

#[tokio::test]
async fn tool_using_turn_flows_from_inbound_to_final_render() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
    std::fs::write(dir.path().join("todo.md"), "y").unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall::new(
                "call_1",
                "list_files",
                format!("{{\"path\":\"{}\"}}", dir.path().display()),
            )],
            finish_reason: FinishReason::ToolCalls,
        },
        ChatResponse {
            content: "You have notes.txt and todo.md.".into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
        },
    ]));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ListFilesTool));

    let bus = Arc::new(MessageBus::new());
    let sessions = SessionManager::new(
        Arc::clone(&bus),
        Arc::clone(&provider) as Arc<dyn ModelProvider>,
        Arc::new(registry),
        SessionConfig {
            model: "test-model".into(),
            system_prompt: "Be helpful.".into(),
            ..Default::default()
        },
    );

    let inbound = InboundMessage::new("term", "u1", "chat9", "what files do I have?");
    let session = sessions.get_or_create(&inbound.session_key);
    let final_text = session
        .process(&CancellationToken::new(), &inbound)
        .await
        .unwrap();
    assert_eq!(final_text, "You have notes.txt and todo.md.");

    // The tool result went back to the model on the second request.
    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    let tool_msg = requests[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("second request carries the tool result");
    assert!(tool_msg.content.contains("notes.txt"));
    assert!(tool_msg.content.contains("todo.md"));
    drop(requests);

    // Replay the published events through the aggregator, the way a channel
    // adapter would.
    let states = StreamStateMap::new();
    let token = CancellationToken::new();
    let mut saw_snapshot_with_tool = false;
    loop {
        let event = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            bus.consume_stream(&token),
        )
        .await
        .expect("stream events should already be queued")
        .expect("bus still open");

        if event.is_terminal() {
            assert!(matches!(event.kind, StreamEventKind::Finish));
            let state = states.remove(&event.session_key).unwrap();
            let text = state.final_text();
            assert_eq!(text, "You have notes.txt and todo.md.");
            assert!(!text.contains("list_files"), "tool blocks stay out of the final text");
            break;
        }
        let state = states.load_or_create(&event.session_key);
        state.apply(&event);
        if state.render_snapshot().contains("list_files") {
            saw_snapshot_with_tool = true;
        }
    }
    assert!(saw_snapshot_with_tool, "live snapshots should show the running tool");
    assert_eq!(states.len(), 0);

    // The conversation history holds the full exchange.
    let history = session.history().await;
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant
        ]
    );
}

#[tokio::test]
async fn second_turn_reuses_history() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ChatResponse {
            content: "First answer".into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
        },
        ChatResponse {
            content: "Second answer".into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
        },
    ]));

    let bus = Arc::new(MessageBus::with_capacity(100));
    let sessions = SessionManager::new(
        Arc::clone(&bus),
        Arc::clone(&provider) as Arc<dyn ModelProvider>,
        Arc::new(ToolRegistry::new()),
        SessionConfig {
            model: "test-model".into(),
            ..Default::default()
        },
    );

    let session = sessions.get_or_create("term:1");
    for content in ["first question", "second question"] {
        session
            .process(
                &CancellationToken::new(),
                &InboundMessage::new("term", "u", "1", content),
            )
            .await
            .unwrap();
    }

    // The second request includes the whole first exchange.
    let requests = provider.requests.lock().unwrap();
    let contents: Vec<&str> = requests[1]
        .messages
        .iter()
        .map(|m: &ChatMessage| m.content.as_str())
        .collect();
    assert!(contents.contains(&"first question"));
    assert!(contents.contains(&"First answer"));
    assert!(contents.contains(&"second question"));
}
