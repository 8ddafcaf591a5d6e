//! Anthropic-style streaming HTTP backend.
//!
//! Responses arrive as server-sent events. [`SseDecoder`] splits the byte
//! stream into frames and [`AnthropicStreamParser`] turns frames into
//! [`StreamEvent`]s, assembling tool inputs streamed as partial JSON.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::backend::{EventStream, GenerationBackend};
use super::types::{GenerationRequest, StopReason, StreamEvent, ToolCall, Usage};
use crate::config::AnthropicConfig;
use crate::errors::GenerationError;

/// One server-sent event frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// The `event:` field, if present.
    pub event: Option<String>,
    /// The joined `data:` lines.
    pub data: String,
}

/// Incremental server-sent events decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // Bytes already searched for a frame boundary.
    scanned: usize,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        loop {
            let start = self.scanned.saturating_sub(1);
            let Some(offset) = self.buffer[start..].windows(2).position(|w| w == b"\n\n") else {
                self.scanned = self.buffer.len();
                return frames;
            };
            let raw: Vec<u8> = self.buffer.drain(..start + offset + 2).collect();
            self.scanned = 0;
            if let Some(frame) = Self::parse_frame(&String::from_utf8_lossy(&raw)) {
                frames.push(frame);
            }
        }
    }

    fn parse_frame(raw: &str) -> Option<SseFrame> {
        let mut event = None;
        let mut data: Vec<&str> = Vec::new();
        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                event = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                data.push(rest.strip_prefix(' ').unwrap_or(rest));
            }
        }
        if event.is_none() && data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event,
            data: data.join("\n"),
        })
    }
}

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

/// Turns Anthropic message-stream frames into stream events.
#[derive(Debug, Default)]
pub struct AnthropicStreamParser {
    tool_blocks: HashMap<u64, PendingToolUse>,
}

impl AnthropicStreamParser {
    /// Creates a parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one frame.
    pub fn handle(&mut self, frame: &SseFrame) -> Result<Vec<StreamEvent>, GenerationError> {
        if frame.data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value: Value = serde_json::from_str(&frame.data)
            .map_err(|e| GenerationError::Protocol(format!("invalid event payload: {e}")))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .or(frame.event.as_deref())
            .unwrap_or_default();

        match kind {
            "message_start" => {
                let usage = value.pointer("/message/usage").map(parse_usage).unwrap_or_default();
                Ok(vec![StreamEvent::Usage(usage)])
            }
            "content_block_start" => {
                let index = value.get("index").and_then(Value::as_u64).unwrap_or(0);
                let block = value.get("content_block").cloned().unwrap_or(Value::Null);
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        self.tool_blocks.insert(
                            index,
                            PendingToolUse {
                                id: str_field(&block, "id"),
                                name: str_field(&block, "name"),
                                input_json: String::new(),
                            },
                        );
                        Ok(Vec::new())
                    }
                    Some("text") => {
                        let text = str_field(&block, "text");
                        Ok(if text.is_empty() { Vec::new() } else { vec![StreamEvent::TextDelta(text)] })
                    }
                    _ => Ok(Vec::new()),
                }
            }
            "content_block_delta" => {
                let index = value.get("index").and_then(Value::as_u64).unwrap_or(0);
                let delta = value.get("delta").cloned().unwrap_or(Value::Null);
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => Ok(vec![StreamEvent::TextDelta(str_field(&delta, "text"))]),
                    Some("input_json_delta") => {
                        if let Some(pending) = self.tool_blocks.get_mut(&index) {
                            pending.input_json.push_str(&str_field(&delta, "partial_json"));
                        }
                        Ok(Vec::new())
                    }
                    _ => Ok(Vec::new()),
                }
            }
            "content_block_stop" => {
                let index = value.get("index").and_then(Value::as_u64).unwrap_or(0);
                let Some(pending) = self.tool_blocks.remove(&index) else {
                    return Ok(Vec::new());
                };
                let input = if pending.input_json.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&pending.input_json).map_err(|e| {
                        GenerationError::Protocol(format!("invalid input for tool '{}': {e}", pending.name))
                    })?
                };
                Ok(vec![StreamEvent::ToolUse(ToolCall {
                    id: pending.id,
                    name: pending.name,
                    input,
                })])
            }
            "message_delta" => {
                let mut events = Vec::new();
                if let Some(usage) = value.get("usage") {
                    events.push(StreamEvent::Usage(parse_usage(usage)));
                }
                if let Some(reason) = value.pointer("/delta/stop_reason").filter(|v| !v.is_null()) {
                    let reason: StopReason = serde_json::from_value(reason.clone()).unwrap_or(StopReason::Other);
                    events.push(StreamEvent::Stop(reason));
                }
                Ok(events)
            }
            "error" => {
                let error_type = value.pointer("/error/type").and_then(Value::as_str).unwrap_or("error");
                let message = value
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                Err(GenerationError::Api {
                    status: status_for_error_type(error_type),
                    message: format!("{error_type}: {message}"),
                })
            }
            other => {
                debug!(event = other, "Ignoring stream event");
                Ok(Vec::new())
            }
        }
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn parse_usage(value: &Value) -> Usage {
    let field = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    };
    Usage {
        input_tokens: field("input_tokens"),
        output_tokens: field("output_tokens"),
    }
}

fn status_for_error_type(error_type: &str) -> u16 {
    match error_type {
        "invalid_request_error" => 400,
        "authentication_error" => 401,
        "permission_error" => 403,
        "not_found_error" => 404,
        "rate_limit_error" => 429,
        "overloaded_error" => 529,
        _ => 500,
    }
}

#[derive(Debug, Default)]
struct DecodeState {
    decoder: SseDecoder,
    parser: AnthropicStreamParser,
}

impl DecodeState {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, GenerationError>> {
        let mut out = Vec::new();
        for frame in self.decoder.push(bytes) {
            match self.parser.handle(&frame) {
                Ok(events) => out.extend(events.into_iter().map(Ok)),
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }
}

/// Streams completions from an Anthropic-compatible messages endpoint.
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicBackend {
    /// Creates a backend.
    pub fn new(config: AnthropicConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Builds the JSON request body.
    #[must_use]
    pub fn request_body(request: &GenerationRequest) -> Value {
        let mut body = serde_json::to_value(request).unwrap_or_else(|_| json!({}));
        if let Some(map) = body.as_object_mut() {
            map.insert("stream".to_string(), Value::Bool(true));
        }
        body
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    async fn open_stream(&self, request: &GenerationRequest) -> Result<EventStream, GenerationError> {
        let response = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(model = %request.model, "Opened generation stream");
        let events = response
            .bytes_stream()
            .scan(DecodeState::default(), |state, chunk| {
                let items = match chunk {
                    Ok(bytes) => state.feed(&bytes),
                    Err(e) => vec![Err(GenerationError::Transport(e.to_string()))],
                };
                futures::future::ready(Some(items))
            })
            .flat_map(futures::stream::iter)
            .boxed();
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(chunks: &[&str]) -> Vec<Result<StreamEvent, GenerationError>> {
        let mut state = DecodeState::default();
        chunks.iter().flat_map(|c| state.feed(c.as_bytes())).collect()
    }

    #[test]
    fn test_decoder_handles_split_frames_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: ping\r\ndata: {\"ty").is_empty());
        let frames = decoder.push(b"pe\": \"ping\"}\r\n\r\nevent: x\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("ping".to_string()),
                data: "{\"type\": \"ping\"}".to_string()
            }]
        );
    }

    #[test]
    fn test_decoder_byte_at_a_time() {
        let payload = "x".repeat(4096);
        let raw = format!("event: content_block_delta\ndata: {payload}\n\nevent: ping\n");
        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        for byte in raw.as_bytes() {
            frames.extend(decoder.push(std::slice::from_ref(byte)));
            assert_eq!(decoder.scanned, decoder.buffer.len());
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, payload);
        assert_eq!(decoder.buffer, b"event: ping\n");
    }

    #[test]
    fn test_text_stream() {
        let events = feed_all(&[
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":25,\"output_tokens\":1}}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":7}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ]);
        let events: Vec<StreamEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::Usage(Usage { input_tokens: 25, output_tokens: 1 }),
                StreamEvent::TextDelta("Hel".to_string()),
                StreamEvent::TextDelta("lo".to_string()),
                StreamEvent::Usage(Usage { input_tokens: 0, output_tokens: 7 }),
                StreamEvent::Stop(StopReason::EndTurn),
            ]
        );
    }

    #[test]
    fn test_tool_input_assembled_from_partial_json() {
        let events = feed_all(&[
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_1\",\"name\":\"search\",\"input\":{}}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"q\\\": \\\"nur\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"sing\\\"}\"}}\n\n",
            "data: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
        ]);
        assert_eq!(events.len(), 1);
        match events.into_iter().next().unwrap().unwrap() {
            StreamEvent::ToolUse(call) => {
                assert_eq!(call.id, "tu_1");
                assert_eq!(call.input, json!({"q": "nursing"}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_error_event() {
        let events = feed_all(&[
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        ]);
        assert!(matches!(&events[0], Err(GenerationError::Api { status: 529, .. })));
    }

    #[test]
    fn test_request_body_sets_stream() {
        let body = AnthropicBackend::request_body(&GenerationRequest::new("m", 10).with_user("hi"));
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 10);
    }
}
