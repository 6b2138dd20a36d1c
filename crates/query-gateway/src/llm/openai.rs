//! OpenAI-compatible chat completion client.
//!
//! Works against api.openai.com or any local server exposing
//! `/v1/chat/completions` (llama-server, vLLM, Ollama). Streaming responses are
//! parsed line by line from SSE; tool-call deltas are accumulated per index and
//! emitted whole once the model finishes the turn.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::llm::{
    ChatMessage, CompletionEvent, CompletionService, CompletionStream, ToolCall, ToolSpec,
};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChatDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Tool calls assembled from streamed fragments, keyed by their index.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    pending: BTreeMap<usize, ToolCall>,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, delta: ToolCallDelta) {
        let call = self.pending.entry(delta.index).or_insert_with(|| ToolCall {
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
        if let Some(id) = delta.id {
            call.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                call.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                call.arguments.push_str(&arguments);
            }
        }
    }

    fn drain(&mut self) -> Vec<CompletionEvent> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(index, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{}", index);
                }
                CompletionEvent::ToolCall(call)
            })
            .collect()
    }
}

/// Events carried by one SSE `data:` payload. Returns `true` as the second
/// value once the stream is finished.
fn parse_sse_data(data: &str, calls: &mut ToolCallAccumulator) -> (Vec<CompletionEvent>, bool) {
    if data == "[DONE]" {
        return (calls.drain(), true);
    }
    let chunk = match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping unparseable stream chunk: {}", e);
            return (Vec::new(), false);
        }
    };

    let mut events = Vec::new();
    let mut finished = false;
    for choice in chunk.choices {
        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content {
                if !content.is_empty() {
                    events.push(CompletionEvent::Text(content));
                }
            }
            for call in delta.tool_calls {
                calls.absorb(call);
            }
        }
        if choice.finish_reason.is_some() {
            finished = true;
        }
    }
    if finished {
        events.extend(calls.drain());
    }
    (events, finished)
}

pub struct OpenAiCompletionService {
    base_url: String,
    api_key: Option<String>,
    model: String,
    http_client: reqwest::Client,
}

impl OpenAiCompletionService {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();
        info!("Completion service initialized: {} (model {})", base_url, model);
        Self {
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn to_wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: if m.content.is_empty() && !m.tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                },
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        kind: "function".to_string(),
                        function: WireFunction {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect(),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    async fn post(&self, request: &ChatCompletionRequest<'_>) -> GatewayResult<reqwest::Response> {
        let mut builder = self.http_client.post(self.completions_url()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Completion(format!("LLM backend request failed: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Completion(format!(
                "LLM backend returned {}: {}",
                status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionService {
    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32) -> GatewayResult<String> {
        debug!("Requesting single completion ({} messages)", messages.len());
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: Self::to_wire_messages(&messages),
            temperature,
            stream: false,
            tools: Vec::new(),
            tool_choice: None,
        };
        let response = self.post(&request).await?;
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Completion(format!("Failed to parse LLM response: {}", e)))?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default())
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
        temperature: f32,
    ) -> GatewayResult<CompletionStream> {
        debug!("Starting streamed completion ({} messages, {} tools)", messages.len(), tools.len());
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: Self::to_wire_messages(&messages),
            temperature,
            stream: true,
            tools: tools
                .iter()
                .map(|spec| WireTool { kind: "function", function: spec })
                .collect(),
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
        };
        let response = self.post(&request).await?;
        let byte_stream = response.bytes_stream();

        let events = async_stream::try_stream! {
            let mut lines = LineBuffer::default();
            let mut calls = ToolCallAccumulator::default();
            futures_util::pin_mut!(byte_stream);
            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result
                    .map_err(|e| GatewayError::Completion(format!("Stream read error: {}", e)))?;
                for line in lines.push(&chunk) {
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let (parsed, finished) = parse_sse_data(data.trim(), &mut calls);
                    for event in parsed {
                        yield event;
                    }
                    if finished {
                        return;
                    }
                }
            }
            warn!("Completion stream ended without a finish marker");
            for event in calls.drain() {
                yield event;
            }
        };
        Ok(Box::pin(events))
    }
}

/// Splits raw stream bytes into complete lines. A line is decoded only once its
/// newline arrives, so a character split across chunks stays intact.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut lines = LineBuffer::default();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        assert!(lines.push(&line[..split]).is_empty());
        let complete = lines.push(&line[split..]);
        assert_eq!(complete.len(), 1);

        let mut calls = ToolCallAccumulator::default();
        let data = complete[0].strip_prefix("data:").unwrap().trim();
        let (events, _) = parse_sse_data(data, &mut calls);
        assert_eq!(events, vec![CompletionEvent::Text("café".to_string())]);
    }

    #[test]
    fn test_line_buffer_keeps_partial_tail() {
        let mut lines = LineBuffer::default();
        assert_eq!(lines.push(b"data: a\ndata: b"), vec!["data: a".to_string()]);
        assert_eq!(lines.push(b"\n\n"), vec!["data: b".to_string(), String::new()]);
    }

    #[test]
    fn test_text_deltas_emitted_in_order() {
        let mut calls = ToolCallAccumulator::default();
        let (events, finished) =
            parse_sse_data(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#, &mut calls);
        assert_eq!(events, vec![CompletionEvent::Text("Hel".to_string())]);
        assert!(!finished);
    }

    #[test]
    fn test_tool_call_fragments_assembled() {
        let mut calls = ToolCallAccumulator::default();
        parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"internal_search","arguments":"{\"quest"}}]}}]}"#,
            &mut calls,
        );
        let (events, finished) = parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ion\":\"orders\"}"}}]},"finish_reason":"tool_calls"}]}"#,
            &mut calls,
        );
        assert!(finished);
        assert_eq!(
            events,
            vec![CompletionEvent::ToolCall(ToolCall {
                id: "call_a".to_string(),
                name: "internal_search".to_string(),
                arguments: r#"{"question":"orders"}"#.to_string(),
            })]
        );
    }

    #[test]
    fn test_done_marker_finishes() {
        let mut calls = ToolCallAccumulator::default();
        let (events, finished) = parse_sse_data("[DONE]", &mut calls);
        assert!(events.is_empty());
        assert!(finished);
    }

    #[test]
    fn test_tool_messages_serialize_openai_shape() {
        let messages = vec![
            ChatMessage::assistant_tool_calls(
                "",
                vec![ToolCall { id: "c1".into(), name: "web_search".into(), arguments: "{}".into() }],
            ),
            ChatMessage::tool_result("c1", "- result"),
        ];
        let wire = serde_json::to_value(OpenAiCompletionService::to_wire_messages(&messages)).unwrap();
        assert_eq!(wire[0]["role"], "assistant");
        assert!(wire[0].get("content").is_none());
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "web_search");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "c1");
    }

    #[tokio::test]
    async fn test_complete_against_mock_backend() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"temperature": 0.0, "stream": false})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"<sql>SELECT 1;</sql>"}}]}"#)
            .create_async()
            .await;

        let service = OpenAiCompletionService::new(server.url(), Some("sk-test".into()), "m", Duration::from_secs(5));
        let text = service.complete(vec![ChatMessage::user("hi")], 0.0).await.unwrap();
        assert_eq!(text, "<sql>SELECT 1;</sql>");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stream_against_mock_backend() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" world\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let service = OpenAiCompletionService::new(server.url(), None, "m", Duration::from_secs(5));
        let stream = service.stream(vec![ChatMessage::user("hi")], Vec::new(), 0.2).await.unwrap();
        let events: Vec<CompletionEvent> = stream.try_collect().await.unwrap();
        assert_eq!(
            events,
            vec![
                CompletionEvent::Text("Hello".to_string()),
                CompletionEvent::Text(" world".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_backend_error_status_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;
        let service = OpenAiCompletionService::new(server.url(), None, "m", Duration::from_secs(5));
        match service.complete(vec![ChatMessage::user("hi")], 0.0).await {
            Err(GatewayError::Completion(msg)) => assert!(msg.contains("401")),
            other => panic!("expected completion error, got {other:?}"),
        }
    }
}
