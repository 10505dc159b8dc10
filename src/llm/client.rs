//! Streaming chat client for OpenAI-compatible servers
//!
//! The server answers `POST {base_url}/chat/completions` with `stream: true`
//! as server-sent events. Each `data:` line is one completion chunk; the
//! stream ends with `data: [DONE]` or when the connection closes.

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use serde::Deserialize;
use thiserror::Error;

use super::stream::{DeltaStream, StreamDelta, ToolCallFragment};
use super::types::{ChatMessage, Tool};

/// Error type for chat operations
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("stream error: {0}")]
    Stream(String),
}

/// The capability the agent loop consumes: stream a completion for a
/// history and a fixed set of tools
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<DeltaStream, ChatError>;
}

/// Client for `/chat/completions` with tool support
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    client: reqwest::Client,
}

impl ChatClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. "http://localhost:11434/v1"
    /// * `model` - The model name (e.g., "qwen3")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            temperature: 0.0,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl ModelClient for ChatClient {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<DeltaStream, ChatError> {
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "temperature": self.temperature,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        let mut request = self.client.post(&endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut bytes_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = SseBuffer::default();
            let mut finished = false;

            while !finished {
                let events = match bytes_stream.next().await {
                    Some(Ok(chunk)) => buffer.push(&chunk),
                    Some(Err(e)) => {
                        yield Err(ChatError::from(e));
                        break;
                    }
                    None => {
                        finished = true;
                        buffer.finish()
                    }
                };

                for event in events {
                    match event {
                        SseEvent::Done => {
                            finished = true;
                            break;
                        }
                        SseEvent::Data(data) => match parse_chunk(&data) {
                            Ok(deltas) => {
                                for delta in deltas {
                                    yield Ok::<StreamDelta, ChatError>(delta);
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                finished = true;
                                break;
                            }
                        },
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// One complete server-sent event payload
#[derive(Debug, Clone, PartialEq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Splits the byte stream into `data:` lines
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network chunks decode correctly.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(event) = Self::parse_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated
    fn finish(&mut self) -> Vec<SseEvent> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        self.push(b"\n")
    }

    fn parse_line(line: &str) -> Option<SseEvent> {
        let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            Some(SseEvent::Done)
        } else if data.is_empty() {
            None
        } else {
            Some(SseEvent::Data(data.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Convert one completion chunk into deltas
fn parse_chunk(data: &str) -> Result<Vec<StreamDelta>, ChatError> {
    let chunk: CompletionChunk = serde_json::from_str(data)?;

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ChatError::Stream(message));
    }

    let mut deltas = Vec::new();
    // Only the first choice is consumed; the loop never asks for n > 1
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                deltas.push(StreamDelta::Content(content));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match call.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                deltas.push(StreamDelta::ToolCall(ToolCallFragment {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                }));
            }
        }
        if choice.finish_reason.is_some() {
            deltas.push(StreamDelta::Done {
                stop_reason: choice.finish_reason,
            });
        }
    }

    Ok(deltas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::stream::StreamAccumulator;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_sse_buffer_handles_split_lines() {
        let mut buffer = SseBuffer::default();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        let events = buffer.push(b":1}\r\n\r\ndata: [DONE]\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn test_sse_buffer_keeps_split_utf8_intact() {
        let line = "data: {\"content\":\"héllo\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xc3).unwrap() + 1;

        let mut buffer = SseBuffer::default();
        assert!(buffer.push(&line[..split]).is_empty());
        let events = buffer.push(&line[split..]);
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"content\":\"héllo\"}".to_string())]
        );
    }

    #[test]
    fn test_sse_buffer_flushes_unterminated_line() {
        let mut buffer = SseBuffer::default();
        assert!(buffer.push(b": keep-alive\ndata: [DONE]").is_empty());
        assert_eq!(buffer.finish(), vec![SseEvent::Done]);
    }

    #[test]
    fn test_parse_chunk_tool_call_fragment() {
        let data = r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"id":"call_x","type":"function","function":{"name":"shell_command","arguments":"{\"com"}}]},"finish_reason":null}]}"#;
        let deltas = parse_chunk(data).unwrap();
        assert_eq!(
            deltas,
            vec![StreamDelta::ToolCall(
                ToolCallFragment::new(1)
                    .with_id("call_x")
                    .with_name("shell_command")
                    .with_arguments("{\"com")
            )]
        );
    }

    #[test]
    fn test_parse_chunk_null_fields_and_finish() {
        let data = r#"{"choices":[{"index":0,"delta":{"content":null,"tool_calls":null},"finish_reason":"tool_calls"}]}"#;
        let deltas = parse_chunk(data).unwrap();
        assert_eq!(
            deltas,
            vec![StreamDelta::Done {
                stop_reason: Some("tool_calls".to_string())
            }]
        );
    }

    #[test]
    fn test_parse_chunk_error_payload() {
        let data = r#"{"error":{"message":"model overloaded"}}"#;
        match parse_chunk(data) {
            Err(ChatError::Stream(msg)) => assert_eq!(msg, "model overloaded"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_chat_yields_deltas_in_order() {
        let server = MockServer::start().await;

        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Listing\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"file_operation\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"type\\\":\\\"list\\\",\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"path\\\":\\\"/\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "model": "qwen3",
                "stream": true,
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(format!("{}/v1", server.uri()), "qwen3").with_api_key("secret");
        let tools = vec![Tool::function("file_operation", "files", serde_json::json!({}))];
        let mut stream = client
            .stream_chat(&[ChatMessage::user("list files in /")], &tools)
            .await
            .unwrap();

        let mut acc = StreamAccumulator::new();
        let mut count = 0;
        while let Some(delta) = stream.next().await {
            acc.apply(&delta.unwrap());
            count += 1;
        }

        assert_eq!(count, 5);
        let round = acc.finish();
        assert_eq!(round.content.as_deref(), Some("Listing"));
        assert_eq!(round.tool_calls.len(), 1);
        assert_eq!(round.tool_calls[0].id, "call_1");
        assert_eq!(
            round.tool_calls[0].function.arguments,
            r#"{"type":"list","path":"/"}"#
        );
        assert_eq!(round.stop_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn test_stream_chat_reports_http_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri(), "qwen3");
        let Err(err) = client.stream_chat(&[ChatMessage::user("hi")], &[]).await else {
            panic!("expected an error");
        };
        match err {
            ChatError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected: {}", other),
        }
    }
}
