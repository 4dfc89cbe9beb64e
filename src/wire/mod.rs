use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod decode;
pub mod encode;
pub mod stream;

/// Family-neutral chat request. Every ingress decoder produces one of these
/// and every egress encoder consumes one; nothing downstream of the decoders
/// looks at family-specific JSON again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDecl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub thinking: Thinking,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            parts: Vec::new(),
        }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    Thinking {
        text: String,
    },
    /// Assistant-only. `arguments` is the raw JSON text exactly as the
    /// producing family emitted it.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// Tool-role only; `call_id` refers to an earlier assistant `ToolCall`.
    ToolResult {
        call_id: String,
        parts: Vec<Part>,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Url { url: String },
    Base64 { media_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Named { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonObject,
    JsonSchema { schema: Value },
}

/// Reasoning knob in neutral form. `Effort` is the OpenAI-style tri-level,
/// `Budget` the Anthropic/Gemini-style token count; the egress encoders
/// translate between the two through the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Thinking {
    #[default]
    None,
    Effort {
        effort: Effort,
    },
    Budget {
        tokens: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn as_str(self) -> &'static str {
        match self {
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Other,
}

/// Token counts as reported upstream. Absent counts stay `None`; the proxy
/// never invents numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub finish_reason: Option<FinishReason>,
    pub parts: Vec<Part>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    Thinking,
    ToolCall { id: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockDelta {
    Text { text: String },
    /// Partial tool-call argument JSON, forwarded byte-for-byte.
    Json { json: String },
    Thinking { text: String },
}

/// Neutral streaming event. Stream decoders emit these in order; stream
/// encoders consume them. Blocks open and close in strict nesting per index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        id: String,
        model: String,
    },
    BlockStart {
        index: u32,
        #[serde(flatten)]
        kind: BlockKind,
    },
    BlockDelta {
        index: u32,
        #[serde(flatten)]
        delta: BlockDelta,
    },
    BlockStop {
        index: u32,
    },
    MessageDelta {
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    },
    MessageStop,
}

/// Concatenated text of the plain-text parts.
pub fn text_of(parts: &[Part]) -> String {
    let mut out = String::new();
    for part in parts {
        if let Part::Text { text } = part {
            out.push_str(text);
        }
    }
    out
}

pub fn has_tool_call(parts: &[Part]) -> bool {
    parts.iter().any(|p| matches!(p, Part::ToolCall { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::Family;
    use crate::thinking::ThinkingConfig;
    use crate::wire::encode::EgressOptions;
    use serde_json::json;

    fn neutral_request() -> ChatRequest {
        ChatRequest {
            model: "test-model".into(),
            system: Some("Be terse.".into()),
            messages: vec![
                Message {
                    role: Role::User,
                    parts: vec![
                        Part::Text {
                            text: "look at this".into(),
                        },
                        Part::Image {
                            source: ImageSource::Base64 {
                                media_type: "image/png".into(),
                                data: "QUJD".into(),
                            },
                        },
                    ],
                },
                Message {
                    role: Role::Assistant,
                    parts: vec![
                        Part::Text {
                            text: "checking".into(),
                        },
                        Part::ToolCall {
                            id: "call_1".into(),
                            name: "get_weather".into(),
                            arguments: "{\"city\":\"Paris\"}".into(),
                        },
                    ],
                },
                Message {
                    role: Role::Tool,
                    parts: vec![Part::ToolResult {
                        call_id: "call_1".into(),
                        parts: vec![Part::Text {
                            text: "sunny".into(),
                        }],
                        is_error: false,
                    }],
                },
                Message::text(Role::User, "so?"),
            ],
            tools: vec![ToolDecl {
                name: "get_weather".into(),
                description: Some("weather by city".into()),
                parameters: Some(json!({
                    "type": "object",
                    "properties": { "city": { "type": "string" } }
                })),
            }],
            tool_choice: Some(ToolChoice::Required),
            max_tokens: Some(256),
            temperature: Some(0.5),
            top_p: Some(0.9),
            stop: vec!["END".into()],
            response_format: None,
            thinking: Thinking::None,
            stream: false,
        }
    }

    fn opts(thinking: &ThinkingConfig, source: Family) -> EgressOptions<'_> {
        EgressOptions {
            source,
            thinking,
            anthropic_max_tokens: 32000,
            openai_reasoning_max_tokens: 32000,
        }
    }

    fn assert_round_trip(original: &ChatRequest, decoded: &ChatRequest) {
        assert_eq!(decoded.model, original.model);
        assert_eq!(decoded.system, original.system);
        assert_eq!(decoded.messages, original.messages);
        assert_eq!(decoded.tools, original.tools);
        assert_eq!(decoded.tool_choice, original.tool_choice);
        assert_eq!(decoded.max_tokens, original.max_tokens);
        assert_eq!(decoded.temperature, original.temperature);
        assert_eq!(decoded.top_p, original.top_p);
        assert_eq!(decoded.stop, original.stop);
        assert_eq!(decoded.thinking, original.thinking);
        assert_eq!(decoded.stream, original.stream);
    }

    #[test]
    fn openai_encode_decode_round_trips() {
        let thinking = ThinkingConfig::default();
        let request = neutral_request();
        let body = encode::openai::encode_request(
            &request,
            "test-model",
            &opts(&thinking, Family::Anthropic),
        );
        let decoded = decode::openai::decode_request(&body).unwrap();
        assert_round_trip(&request, &decoded);
    }

    #[test]
    fn anthropic_encode_decode_round_trips() {
        let thinking = ThinkingConfig::default();
        let request = neutral_request();
        let body = encode::anthropic::encode_request(
            &request,
            "test-model",
            &opts(&thinking, Family::Openai),
        );
        let decoded = decode::anthropic::decode_request(&body).unwrap();
        assert_round_trip(&request, &decoded);
    }

    #[test]
    fn gemini_encode_decode_round_trips() {
        let thinking = ThinkingConfig::default();
        let request = neutral_request();
        let body =
            encode::gemini::encode_request(&request, &opts(&thinking, Family::Openai));
        let decoded = decode::gemini::decode_request(&body, "test-model", false).unwrap();
        assert_round_trip(&request, &decoded);
    }
}
