//! OpenAI-compatible client against a mock HTTP endpoint.

use futures::StreamExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use palaver::provider::FinishReason;
use palaver::{
    ChatMessage, ChatRequest, ModelProvider, OpenAiProvider, PalaverError, ResponseEvent,
};

fn request() -> ChatRequest {
    ChatRequest {
        model: "test-model".into(),
        messages: vec![ChatMessage::user("hello")],
        tools: Vec::new(),
        max_tokens: None,
    }
}

#[tokio::test]
async fn send_parses_text_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-model",
            "stream": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": { "content": "Hi there" },
                "finish_reason": "stop",
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(server.uri(), "sk-test");
    let response = provider.send(&request()).await.unwrap();
    assert_eq!(response.content, "Hi there");
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert!(response.tool_calls.is_empty());
}

#[tokio::test]
async fn send_parses_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "list_files",
                            "arguments": "{\"path\":\"/tmp\"}",
                        },
                    }],
                },
                "finish_reason": "tool_calls",
            }]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(server.uri(), "sk-test");
    let response = provider.send(&request()).await.unwrap();
    assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].name, "list_files");
    assert_eq!(response.tool_calls[0].arguments, "{\"path\":\"/tmp\"}");
}

#[tokio::test]
async fn send_stream_reassembles_deltas_and_tool_fragments() {
    let server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"The \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"answer\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\
         \"function\":{\"name\":\"shell\",\"arguments\":\"{\\\"cmd\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\
         \"function\":{\"arguments\":\"line\\\":\\\"ls\\\"}\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(server.uri(), "sk-test");
    let stream = provider.send_stream(&request()).await.unwrap();
    let events: Vec<ResponseEvent> = stream.map(|e| e.unwrap()).collect().await;

    assert_eq!(events[0], ResponseEvent::TextDelta("The ".into()));
    assert_eq!(events[1], ResponseEvent::TextDelta("answer".into()));
    match &events[2] {
        ResponseEvent::ToolCall(call) => {
            assert_eq!(call.id, "call_1");
            assert_eq!(call.name, "shell");
            assert_eq!(call.arguments, "{\"cmdline\":\"ls\"}");
        }
        other => panic!("expected tool call, got {other:?}"),
    }
    assert_eq!(events[3], ResponseEvent::Finish(FinishReason::ToolCalls));
}

#[tokio::test]
async fn non_200_maps_to_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(server.uri(), "sk-bad");
    let err = provider.send(&request()).await.unwrap_err();
    match err {
        PalaverError::Api { status, message } => {
            assert_eq!(status, 401);
            assert!(message.contains("invalid api key"));
        }
        other => panic!("expected api error, got {other:?}"),
    }
}
