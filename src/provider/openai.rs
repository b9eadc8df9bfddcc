//! OpenAI-compatible chat-completions client (plain and SSE streaming).
//!
//! Works against any endpoint speaking the chat-completions wire format
//! (OpenAI, Azure-style deployments, local gateways) via base URL + API key.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use super::http::{bearer_headers, parse_sse_data, shared_client, status_to_error};
use super::{ChatRequest, ChatResponse, EventStream, FinishReason, ModelProvider, ResponseEvent};
use crate::error::{PalaverError, Result};
use crate::types::{ChatMessage, Role, ToolCall};

pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn build_request_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> =
            request.messages.iter().map(message_to_wire).collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = tools.into();
        }
        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_request_body(request, false);
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = request.model.as_str(), "openai send");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let data: WireResponse = resp.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PalaverError::provider("openai", "no choices in response"))?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
                .collect(),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::parse)
                .unwrap_or_default(),
        })
    }

    async fn send_stream(&self, request: &ChatRequest) -> Result<EventStream> {
        let body = self.build_request_body(request, true);
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = request.model.as_str(), "openai send_stream");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            // Tool-call fragments indexed by the wire `index` field; flushed
            // whole once the finish reason arrives.
            let mut pending_calls: Vec<ToolCall> = Vec::new();
            let mut finish: Option<FinishReason> = None;
            futures::pin_mut!(byte_stream);

            'outer: while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(PalaverError::Network(e));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = parse_sse_data(&line) else { continue };
                    let Ok(chunk) = serde_json::from_str::<WireStreamChunk>(data) else {
                        continue; // skip unparseable chunks
                    };
                    let Some(choice) = chunk.choices.into_iter().next() else { continue };

                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield Ok(ResponseEvent::TextDelta(text));
                        }
                    }
                    for fragment in choice.delta.tool_calls.unwrap_or_default() {
                        merge_fragment(&mut pending_calls, fragment);
                    }
                    if let Some(reason) = choice.finish_reason.as_deref() {
                        finish = Some(FinishReason::parse(reason));
                        break 'outer;
                    }
                }
            }

            for call in pending_calls {
                yield Ok(ResponseEvent::ToolCall(call));
            }
            yield Ok(ResponseEvent::Finish(finish.unwrap_or_default()));
        };

        Ok(Box::pin(stream))
    }
}

fn merge_fragment(pending: &mut Vec<ToolCall>, fragment: WireToolCallFragment) {
    let index = fragment.index.unwrap_or(pending.len());
    if pending.len() <= index {
        pending.resize_with(index + 1, ToolCall::default);
    }
    let call = &mut pending[index];
    if let Some(id) = fragment.id {
        call.id = id;
    }
    if let Some(function) = fragment.function {
        if let Some(name) = function.name {
            call.name.push_str(&name);
        }
        if let Some(arguments) = function.arguments {
            call.arguments.push_str(&arguments);
        }
    }
}

fn message_to_wire(msg: &ChatMessage) -> serde_json::Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    match msg.role {
        Role::Tool => serde_json::json!({
            "role": role,
            "tool_call_id": msg.tool_call_id,
            "content": msg.content,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<serde_json::Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.arguments },
                    })
                })
                .collect();
            serde_json::json!({ "role": role, "content": msg.content, "tool_calls": calls })
        }
        _ => serde_json::json!({ "role": role, "content": msg.content }),
    }
}

// Wire shapes (only the fields we read).

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallFragment>>,
}

#[derive(Deserialize)]
struct WireToolCallFragment {
    index: Option<usize>,
    id: Option<String>,
    function: Option<WireFunctionFragment>,
}

#[derive(Deserialize)]
struct WireFunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> WireToolCallFragment {
        WireToolCallFragment {
            index: Some(index),
            id: id.map(String::from),
            function: Some(WireFunctionFragment {
                name: name.map(String::from),
                arguments: args.map(String::from),
            }),
        }
    }

    #[test]
    fn fragments_merge_by_index() {
        let mut pending = Vec::new();
        merge_fragment(&mut pending, fragment(0, Some("call_1"), Some("shell"), Some("{\"cmd")));
        merge_fragment(&mut pending, fragment(0, None, None, Some("line\":\"ls\"}")));
        merge_fragment(&mut pending, fragment(1, Some("call_2"), Some("think"), Some("{}")));

        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "call_1");
        assert_eq!(pending[0].arguments, "{\"cmdline\":\"ls\"}");
        assert_eq!(pending[1].name, "think");
    }

    #[test]
    fn assistant_tool_calls_round_trip_to_wire() {
        let msg = ChatMessage::assistant(
            "",
            vec![ToolCall::new("call_1", "shell", "{\"cmdline\":\"ls\"}")],
        );
        let wire = message_to_wire(&msg);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "shell");
        let back = ChatMessage::tool_result("call_1", "done");
        assert_eq!(message_to_wire(&back)["tool_call_id"], "call_1");
    }
}
