//! Request, response and stream event types for generation calls.
//!
//! Message and content shapes follow the Anthropic messages API so requests
//! serialize directly onto the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ModelSelection;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller.
    User,
    /// The model.
    Assistant,
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A tool invocation requested by the model.
    ToolUse {
        /// Invocation ID, echoed in the result.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        input: Value,
    },
    /// The result of a tool invocation.
    ToolResult {
        /// The invocation this answers.
        tool_use_id: String,
        /// Result text.
        content: String,
        /// True if the tool failed.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author.
    pub role: Role,
    /// Content blocks.
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Creates a user text message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Creates an assistant text message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Returns the concatenated text blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A tool the model may invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON schema of the input.
    pub input_schema: Value,
}

impl ToolSpec {
    /// Creates a tool spec.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool invocation collected from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Invocation ID.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool input.
    pub input: Value,
}

/// Everything needed to issue one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<Message>,
    /// System prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Output-length ceiling.
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Tools the model may invoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

impl GenerationRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            system: None,
            max_tokens,
            temperature: None,
            tools: Vec::new(),
        }
    }

    /// Creates a request for a model selection.
    #[must_use]
    pub fn for_model(selection: &ModelSelection) -> Self {
        Self::new(selection.model.clone(), selection.max_tokens)
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Appends a user text message.
    #[must_use]
    pub fn with_user(mut self, text: impl Into<String>) -> Self {
        self.messages.push(Message::user(text));
        self
    }

    /// Appends a message.
    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Adds a tool.
    #[must_use]
    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }
}

/// Token accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u32,
    /// Generated tokens.
    pub output_tokens: u32,
}

impl Usage {
    /// Returns total tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Folds a streamed report into this one. Non-zero fields replace, since
    /// providers report running totals.
    pub fn merge(&mut self, report: Usage) {
        if report.input_tokens > 0 {
            self.input_tokens = report.input_tokens;
        }
        if report.output_tokens > 0 {
            self.output_tokens = report.output_tokens;
        }
    }

    /// Adds another call's usage.
    pub fn accumulate(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Why the model stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn.
    EndTurn,
    /// Output ceiling reached.
    MaxTokens,
    /// A stop sequence matched.
    StopSequence,
    /// The model wants tool results.
    ToolUse,
    /// Anything else the provider reports.
    #[serde(other)]
    Other,
}

/// One decoded event from a generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chunk of generated text.
    TextDelta(String),
    /// A complete tool invocation.
    ToolUse(ToolCall),
    /// Running token counts.
    Usage(Usage),
    /// The model finished.
    Stop(StopReason),
}

/// The definitive outcome of a supervised call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generated text.
    pub text: String,
    /// Token usage across every attempt and tool round that completed.
    pub usage: Usage,
    /// Stop reason of the last stream, if it reported one.
    pub stop_reason: Option<StopReason>,
    /// True if a watchdog fired and the text was salvaged.
    pub partial: bool,
    /// Tool rounds performed.
    pub tool_rounds: u32,
    /// Model that served the call.
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let message = Message {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: "tu_1".to_string(),
                content: "42".to_string(),
                is_error: false,
            }],
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"role": "user", "content": [{"type": "tool_result", "tool_use_id": "tu_1", "content": "42"}]})
        );
    }

    #[test]
    fn test_request_omits_empty_fields() {
        let request = GenerationRequest::new("m", 100).with_user("hi");
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("system").is_none());
        assert_eq!(value["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn test_message_text() {
        let message = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::Text { text: "a".to_string() },
                ContentBlock::ToolUse {
                    id: "1".to_string(),
                    name: "search".to_string(),
                    input: json!({}),
                },
                ContentBlock::Text { text: "b".to_string() },
            ],
        };
        assert_eq!(message.text(), "ab");
    }

    #[test]
    fn test_usage_merge_and_accumulate() {
        let mut usage = Usage::default();
        usage.merge(Usage { input_tokens: 10, output_tokens: 1 });
        usage.merge(Usage { input_tokens: 0, output_tokens: 50 });
        assert_eq!(usage, Usage { input_tokens: 10, output_tokens: 50 });

        usage.accumulate(Usage { input_tokens: 5, output_tokens: 5 });
        assert_eq!(usage.total(), 70);
    }

    #[test]
    fn test_unknown_stop_reason() {
        let reason: StopReason = serde_json::from_str("\"refusal\"").unwrap();
        assert_eq!(reason, StopReason::Other);
    }
}
