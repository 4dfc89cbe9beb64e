use crate::wire::decode::anthropic::finish_reason_from_str;
use crate::wire::encode::anthropic::stop_reason_to_str;
use crate::wire::stream::SseFrame;
use crate::wire::{BlockDelta, BlockKind, FinishReason, StreamEvent, Usage};
use serde_json::{Value, json};
use std::collections::HashMap;

/// The typed event stream maps one-to-one onto the neutral sequence; this
/// decoder mostly renames things and tracks open indices for abrupt EOF.
#[derive(Default)]
pub struct StreamDecoder {
    open: Vec<u32>,
    input_tokens: Option<u64>,
    finish_sent: bool,
    done: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &str) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        let Ok(payload) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        match payload.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "message_start" => {
                let message = payload.get("message").cloned().unwrap_or(Value::Null);
                self.input_tokens = message
                    .get("usage")
                    .and_then(|u| u.get("input_tokens"))
                    .and_then(|v| v.as_u64());
                events.push(StreamEvent::MessageStart {
                    id: message
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("msg")
                        .to_string(),
                    model: message
                        .get("model")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                });
            }
            "content_block_start" => {
                let index = payload.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                let block = payload.get("content_block").cloned().unwrap_or(Value::Null);
                let kind = match block.get("type").and_then(|v| v.as_str()).unwrap_or("text") {
                    "tool_use" => BlockKind::ToolCall {
                        id: block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    },
                    "thinking" => BlockKind::Thinking,
                    _ => BlockKind::Text,
                };
                self.open.push(index);
                events.push(StreamEvent::BlockStart { index, kind });
            }
            "content_block_delta" => {
                let index = payload.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                let delta = payload.get("delta").cloned().unwrap_or(Value::Null);
                match delta.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            events.push(StreamEvent::BlockDelta {
                                index,
                                delta: BlockDelta::Text {
                                    text: text.to_string(),
                                },
                            });
                        }
                    }
                    "input_json_delta" => {
                        if let Some(fragment) =
                            delta.get("partial_json").and_then(|v| v.as_str())
                        {
                            events.push(StreamEvent::BlockDelta {
                                index,
                                delta: BlockDelta::Json {
                                    json: fragment.to_string(),
                                },
                            });
                        }
                    }
                    "thinking_delta" => {
                        if let Some(text) = delta.get("thinking").and_then(|v| v.as_str()) {
                            events.push(StreamEvent::BlockDelta {
                                index,
                                delta: BlockDelta::Thinking {
                                    text: text.to_string(),
                                },
                            });
                        }
                    }
                    // signature_delta has no neutral form.
                    _ => {}
                }
            }
            "content_block_stop" => {
                let index = payload.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                self.open.retain(|i| *i != index);
                events.push(StreamEvent::BlockStop { index });
            }
            "message_delta" => {
                self.finish_sent = true;
                let usage = payload.get("usage").map(|u| Usage {
                    prompt_tokens: u
                        .get("input_tokens")
                        .and_then(|v| v.as_u64())
                        .or(self.input_tokens),
                    completion_tokens: u.get("output_tokens").and_then(|v| v.as_u64()),
                    total_tokens: None,
                });
                events.push(StreamEvent::MessageDelta {
                    finish_reason: payload
                        .get("delta")
                        .and_then(|d| d.get("stop_reason"))
                        .and_then(|v| v.as_str())
                        .map(finish_reason_from_str),
                    usage,
                });
            }
            "message_stop" => {
                self.done = true;
                events.push(StreamEvent::MessageStop);
            }
            // ping and unknown event types pass silently.
            _ => {}
        }
        events
    }

    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        let mut events = Vec::new();
        for index in self.open.drain(..) {
            events.push(StreamEvent::BlockStop { index });
        }
        if !self.finish_sent {
            events.push(StreamEvent::MessageDelta {
                finish_reason: Some(FinishReason::Other),
                usage: None,
            });
        }
        events.push(StreamEvent::MessageStop);
        self.done = true;
        events
    }
}

/// Renders neutral events as the typed `event:`-named frames of the
/// messages API.
pub struct StreamEncoder {
    message_id: String,
    model: String,
    tool_ids: HashMap<u32, String>,
}

impl StreamEncoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4()),
            model: model.into(),
            tool_ids: HashMap::new(),
        }
    }

    pub fn encode(&mut self, event: &StreamEvent) -> Vec<SseFrame> {
        match event {
            StreamEvent::MessageStart { .. } => {
                let body = json!({
                    "type": "message_start",
                    "message": {
                        "id": self.message_id,
                        "type": "message",
                        "role": "assistant",
                        "model": self.model,
                        "content": [],
                        "stop_reason": Value::Null,
                        "stop_sequence": Value::Null,
                        "usage": { "input_tokens": 0, "output_tokens": 0 },
                    }
                });
                vec![SseFrame::named("message_start", body.to_string())]
            }
            StreamEvent::BlockStart { index, kind } => {
                let content_block = match kind {
                    BlockKind::Text => json!({ "type": "text", "text": "" }),
                    BlockKind::Thinking => json!({ "type": "thinking", "thinking": "" }),
                    BlockKind::ToolCall { id, name } => {
                        let id = if id.is_empty() {
                            format!("toolu_{}", uuid::Uuid::new_v4())
                        } else {
                            id.clone()
                        };
                        self.tool_ids.insert(*index, id.clone());
                        json!({ "type": "tool_use", "id": id, "name": name, "input": {} })
                    }
                };
                let body = json!({
                    "type": "content_block_start",
                    "index": index,
                    "content_block": content_block,
                });
                vec![SseFrame::named("content_block_start", body.to_string())]
            }
            StreamEvent::BlockDelta { index, delta } => {
                let delta_body = match delta {
                    BlockDelta::Text { text } => json!({ "type": "text_delta", "text": text }),
                    BlockDelta::Json { json: fragment } => {
                        json!({ "type": "input_json_delta", "partial_json": fragment })
                    }
                    BlockDelta::Thinking { text } => {
                        json!({ "type": "thinking_delta", "thinking": text })
                    }
                };
                let body = json!({
                    "type": "content_block_delta",
                    "index": index,
                    "delta": delta_body,
                });
                vec![SseFrame::named("content_block_delta", body.to_string())]
            }
            StreamEvent::BlockStop { index } => {
                let body = json!({ "type": "content_block_stop", "index": index });
                vec![SseFrame::named("content_block_stop", body.to_string())]
            }
            StreamEvent::MessageDelta {
                finish_reason,
                usage,
            } => {
                let body = json!({
                    "type": "message_delta",
                    "delta": {
                        "stop_reason": stop_reason_to_str(*finish_reason),
                        "stop_sequence": Value::Null,
                    },
                    "usage": {
                        "input_tokens": usage.and_then(|u| u.prompt_tokens),
                        "output_tokens": usage.and_then(|u| u.completion_tokens),
                    }
                });
                vec![SseFrame::named("message_delta", body.to_string())]
            }
            StreamEvent::MessageStop => {
                let body = json!({ "type": "message_stop" });
                vec![SseFrame::named("message_stop", body.to_string())]
            }
        }
    }

    /// Terminal error event for failures after the stream has started; the
    /// HTTP status can no longer change.
    pub fn error_frame(&self, code: &str, message: &str) -> SseFrame {
        let body = json!({
            "type": "error",
            "error": { "type": code, "message": message }
        });
        SseFrame::named("error", body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::stream::tests::{assert_well_formed, json_of_block, text_of_block};

    #[test]
    fn typed_events_map_one_to_one() {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for payload in [
            json!({ "type": "message_start", "message": { "id": "msg_1", "model": "claude", "usage": { "input_tokens": 7 } } }),
            json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "text", "text": "" } }),
            json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "hi" } }),
            json!({ "type": "content_block_stop", "index": 0 }),
            json!({ "type": "message_delta", "delta": { "stop_reason": "end_turn" }, "usage": { "output_tokens": 3 } }),
            json!({ "type": "message_stop" }),
        ] {
            events.extend(decoder.feed(&payload.to_string()));
        }
        assert_well_formed(&events);
        assert_eq!(text_of_block(&events, 0), "hi");
        assert!(matches!(
            events.last(),
            Some(StreamEvent::MessageStop)
        ));
        let delta = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::MessageDelta { usage, .. } => *usage,
                _ => None,
            })
            .unwrap();
        assert_eq!(delta.prompt_tokens, Some(7));
        assert_eq!(delta.completion_tokens, Some(3));
    }

    #[test]
    fn input_json_deltas_preserve_fragments() {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for payload in [
            json!({ "type": "message_start", "message": { "id": "msg_1", "model": "claude" } }),
            json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "tool_use", "id": "tu_1", "name": "get_weather" } }),
            json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "input_json_delta", "partial_json": "{\"cit" } }),
            json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "input_json_delta", "partial_json": "y\":\"Paris\"}" } }),
            json!({ "type": "content_block_stop", "index": 0 }),
            json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" } }),
            json!({ "type": "message_stop" }),
        ] {
            events.extend(decoder.feed(&payload.to_string()));
        }
        assert_well_formed(&events);
        assert_eq!(json_of_block(&events, 0), "{\"city\":\"Paris\"}");
    }

    #[test]
    fn abrupt_eof_emits_terminal_events() {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for payload in [
            json!({ "type": "message_start", "message": { "id": "msg_1", "model": "claude" } }),
            json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "text", "text": "" } }),
        ] {
            events.extend(decoder.feed(&payload.to_string()));
        }
        events.extend(decoder.finish());
        assert_well_formed(&events);
        assert!(events.contains(&StreamEvent::MessageDelta {
            finish_reason: Some(FinishReason::Other),
            usage: None
        }));
    }

    #[test]
    fn encoder_emits_family_event_names() {
        let mut encoder = StreamEncoder::new("claude-3-5-sonnet");
        let frames = encoder.encode(&StreamEvent::BlockStart {
            index: 0,
            kind: BlockKind::ToolCall {
                id: String::new(),
                name: "get_weather".into(),
            },
        });
        assert_eq!(frames[0].event.as_deref(), Some("content_block_start"));
        let body: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert!(
            body["content_block"]["id"]
                .as_str()
                .unwrap()
                .starts_with("toolu_")
        );
    }
}
