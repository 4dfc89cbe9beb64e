use crate::wire::decode::openai::{decode_usage, finish_reason_from_str};
use crate::wire::encode::openai::{encode_usage, finish_reason_to_str};
use crate::wire::stream::SseFrame;
use crate::wire::{BlockDelta, BlockKind, FinishReason, StreamEvent, Usage};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Consumes `chat.completion.chunk` frames and emits neutral stream events.
/// Blocks have no explicit ends on this wire; everything open closes when a
/// finish_reason (or the `[DONE]` sentinel) arrives.
#[derive(Default)]
pub struct StreamDecoder {
    started: bool,
    next_index: u32,
    text_index: Option<u32>,
    thinking_index: Option<u32>,
    tool_indices: HashMap<u64, u32>,
    open: Vec<u32>,
    usage: Option<Usage>,
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
        if data.trim() == "[DONE]" {
            return self.terminate(None);
        }
        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(StreamEvent::MessageStart {
                id: chunk
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("chatcmpl")
                    .to_string(),
                model: chunk
                    .get("model")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        if let Some(usage) = decode_usage(chunk.get("usage")) {
            self.usage = Some(usage);
        }

        let Some(choice) = chunk
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
        else {
            return events;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    let index = self.ensure_text_block(&mut events);
                    events.push(StreamEvent::BlockDelta {
                        index,
                        delta: BlockDelta::Text {
                            text: text.to_string(),
                        },
                    });
                }
            }
            if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    let index = self.ensure_thinking_block(&mut events);
                    events.push(StreamEvent::BlockDelta {
                        index,
                        delta: BlockDelta::Thinking {
                            text: text.to_string(),
                        },
                    });
                }
            }
            if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                for call in calls {
                    self.feed_tool_call(call, &mut events);
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            self.close_open_blocks(&mut events);
            self.finish_sent = true;
            events.push(StreamEvent::MessageDelta {
                finish_reason: Some(finish_reason_from_str(reason)),
                usage: self.usage.take(),
            });
        }
        events
    }

    /// Upstream hung up without the sentinel: close what is open and end the
    /// message so downstream encoders can terminate cleanly.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        self.terminate(Some(FinishReason::Other))
    }

    fn terminate(&mut self, abnormal: Option<FinishReason>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.close_open_blocks(&mut events);
        if !self.finish_sent {
            events.push(StreamEvent::MessageDelta {
                finish_reason: abnormal,
                usage: self.usage.take(),
            });
        }
        events.push(StreamEvent::MessageStop);
        self.done = true;
        events
    }

    fn ensure_text_block(&mut self, events: &mut Vec<StreamEvent>) -> u32 {
        if let Some(index) = self.text_index {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.text_index = Some(index);
        self.open.push(index);
        events.push(StreamEvent::BlockStart {
            index,
            kind: BlockKind::Text,
        });
        index
    }

    fn ensure_thinking_block(&mut self, events: &mut Vec<StreamEvent>) -> u32 {
        if let Some(index) = self.thinking_index {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.thinking_index = Some(index);
        self.open.push(index);
        events.push(StreamEvent::BlockStart {
            index,
            kind: BlockKind::Thinking,
        });
        index
    }

    fn feed_tool_call(&mut self, call: &Value, events: &mut Vec<StreamEvent>) {
        let upstream_index = call.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
        let index = match self.tool_indices.get(&upstream_index) {
            Some(index) => *index,
            None => {
                let index = self.next_index;
                self.next_index += 1;
                self.tool_indices.insert(upstream_index, index);
                self.open.push(index);
                events.push(StreamEvent::BlockStart {
                    index,
                    kind: BlockKind::ToolCall {
                        id: call
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: call
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    },
                });
                index
            }
        };
        if let Some(fragment) = call
            .get("function")
            .and_then(|f| f.get("arguments"))
            .and_then(|v| v.as_str())
        {
            if !fragment.is_empty() {
                events.push(StreamEvent::BlockDelta {
                    index,
                    delta: BlockDelta::Json {
                        json: fragment.to_string(),
                    },
                });
            }
        }
    }

    fn close_open_blocks(&mut self, events: &mut Vec<StreamEvent>) {
        for index in self.open.drain(..) {
            events.push(StreamEvent::BlockStop { index });
        }
        self.text_index = None;
        self.thinking_index = None;
        self.tool_indices.clear();
    }
}

/// Renders neutral events as `chat.completion.chunk` frames. Thinking blocks
/// have no chunk form and are dropped here.
pub struct StreamEncoder {
    id: String,
    created: i64,
    model: String,
    tool_indices: HashMap<u32, u64>,
    tool_meta: HashMap<u32, (String, String)>,
    next_tool_index: u64,
}

impl StreamEncoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl_{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            tool_indices: HashMap::new(),
            tool_meta: HashMap::new(),
            next_tool_index: 0,
        }
    }

    pub fn encode(&mut self, event: &StreamEvent) -> Vec<SseFrame> {
        match event {
            StreamEvent::MessageStart { .. } => {
                vec![self.chunk(json!({ "role": "assistant", "content": "" }), None, None)]
            }
            StreamEvent::BlockStart { index, kind } => match kind {
                BlockKind::ToolCall { id, name } => {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_indices.insert(*index, tool_index);
                    self.tool_meta.insert(*index, (id.clone(), name.clone()));
                    vec![self.chunk(
                        json!({
                            "tool_calls": [{
                                "index": tool_index,
                                "id": id,
                                "type": "function",
                                "function": { "name": name, "arguments": "" }
                            }]
                        }),
                        None,
                        None,
                    )]
                }
                BlockKind::Text | BlockKind::Thinking => Vec::new(),
            },
            StreamEvent::BlockDelta { index, delta } => match delta {
                BlockDelta::Text { text } => {
                    vec![self.chunk(json!({ "content": text }), None, None)]
                }
                BlockDelta::Thinking { .. } => Vec::new(),
                BlockDelta::Json { json: fragment } => {
                    let tool_index = self.tool_indices.get(index).copied().unwrap_or(0);
                    let (id, name) = self
                        .tool_meta
                        .get(index)
                        .cloned()
                        .unwrap_or_default();
                    vec![self.chunk(
                        json!({
                            "tool_calls": [{
                                "index": tool_index,
                                "id": id,
                                "type": "function",
                                "function": { "name": name, "arguments": fragment }
                            }]
                        }),
                        None,
                        None,
                    )]
                }
            },
            StreamEvent::BlockStop { .. } => Vec::new(),
            StreamEvent::MessageDelta {
                finish_reason,
                usage,
            } => {
                vec![self.chunk(
                    json!({}),
                    Some(finish_reason_to_str(*finish_reason)),
                    usage.as_ref(),
                )]
            }
            StreamEvent::MessageStop => vec![SseFrame::data("[DONE]")],
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>, usage: Option<&Usage>) -> SseFrame {
        let mut body = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        if usage.is_some() {
            body.as_object_mut()
                .expect("chunk object")
                .insert("usage".to_string(), encode_usage(usage));
        }
        SseFrame::data(body.to_string())
    }
}
