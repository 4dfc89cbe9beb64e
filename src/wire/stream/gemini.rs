use crate::wire::decode::gemini::{decode_usage, finish_reason_from_str};
use crate::wire::encode::gemini::finish_reason_to_str;
use crate::wire::encode::arguments_to_value;
use crate::wire::stream::SseFrame;
use crate::wire::{BlockDelta, BlockKind, FinishReason, StreamEvent, Usage};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

/// Consumes `GenerateContentResponse` fragments. Function calls may arrive
/// split across fragments (name first, args later); blocks are keyed by the
/// call id so later fragments extend the same block.
#[derive(Default)]
pub struct StreamDecoder {
    started: bool,
    next_index: u32,
    text_index: Option<u32>,
    thinking_index: Option<u32>,
    tool_indices: HashMap<String, u32>,
    open: Vec<u32>,
    saw_tool_call: bool,
    usage: Option<Usage>,
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
        let Ok(fragment) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(StreamEvent::MessageStart {
                id: fragment
                    .get("responseId")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("gen_{}", uuid::Uuid::new_v4())),
                model: fragment
                    .get("modelVersion")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        if let Some(usage) = decode_usage(fragment.get("usageMetadata")) {
            self.usage = Some(usage);
        }

        let Some(candidate) = fragment
            .get("candidates")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
        else {
            return events;
        };

        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|v| v.as_array())
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    if part.get("thought").and_then(|v| v.as_bool()) == Some(true) {
                        let index = self.ensure_thinking_block(&mut events);
                        events.push(StreamEvent::BlockDelta {
                            index,
                            delta: BlockDelta::Thinking {
                                text: text.to_string(),
                            },
                        });
                    } else if !text.is_empty() {
                        let index = self.ensure_text_block(&mut events);
                        events.push(StreamEvent::BlockDelta {
                            index,
                            delta: BlockDelta::Text {
                                text: text.to_string(),
                            },
                        });
                    }
                } else if let Some(call) = part.get("functionCall") {
                    self.feed_function_call(call, &mut events);
                }
            }
        }

        if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            let finish = finish_reason_from_str(reason, self.saw_tool_call);
            for index in self.open.drain(..) {
                events.push(StreamEvent::BlockStop { index });
            }
            events.push(StreamEvent::MessageDelta {
                finish_reason: Some(finish),
                usage: self.usage.take(),
            });
            events.push(StreamEvent::MessageStop);
            self.done = true;
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
        events.push(StreamEvent::MessageDelta {
            finish_reason: Some(FinishReason::Other),
            usage: self.usage.take(),
        });
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

    fn feed_function_call(&mut self, call: &Value, events: &mut Vec<StreamEvent>) {
        let name = call
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let key = call
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or(name)
            .to_string();
        if key.is_empty() {
            return;
        }
        self.saw_tool_call = true;
        let index = match self.tool_indices.get(&key) {
            Some(index) => *index,
            None => {
                let index = self.next_index;
                self.next_index += 1;
                self.tool_indices.insert(key.clone(), index);
                self.open.push(index);
                events.push(StreamEvent::BlockStart {
                    index,
                    kind: BlockKind::ToolCall {
                        id: key,
                        name: name.to_string(),
                    },
                });
                index
            }
        };
        if let Some(args) = call.get("args") {
            if !args.is_null() {
                events.push(StreamEvent::BlockDelta {
                    index,
                    delta: BlockDelta::Json {
                        json: serde_json::to_string(args)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
        }
    }
}

/// Renders neutral events as `GenerateContentResponse` fragments. The wire
/// form carries whole functionCall objects, so argument fragments buffer
/// per block (byte order intact) and flush when the block closes.
pub struct StreamEncoder {
    model: String,
    tool_meta: HashMap<u32, (String, String)>,
    tool_args: HashMap<u32, String>,
}

impl StreamEncoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tool_meta: HashMap::new(),
            tool_args: HashMap::new(),
        }
    }

    pub fn encode(&mut self, event: &StreamEvent) -> Vec<SseFrame> {
        match event {
            StreamEvent::MessageStart { .. } => Vec::new(),
            StreamEvent::BlockStart { index, kind } => {
                if let BlockKind::ToolCall { id, name } = kind {
                    self.tool_meta.insert(*index, (id.clone(), name.clone()));
                    self.tool_args.insert(*index, String::new());
                }
                Vec::new()
            }
            StreamEvent::BlockDelta { index, delta } => match delta {
                BlockDelta::Text { text } => vec![self.fragment(json!({ "text": text }))],
                BlockDelta::Thinking { text } => {
                    vec![self.fragment(json!({ "text": text, "thought": true }))]
                }
                BlockDelta::Json { json: fragment } => {
                    if let Some(buffer) = self.tool_args.get_mut(index) {
                        buffer.push_str(fragment);
                    }
                    Vec::new()
                }
            },
            StreamEvent::BlockStop { index } => {
                let Some((id, name)) = self.tool_meta.remove(index) else {
                    return Vec::new();
                };
                let arguments = self.tool_args.remove(index).unwrap_or_default();
                vec![self.fragment(json!({
                    "functionCall": {
                        "id": id,
                        "name": name,
                        "args": arguments_to_value(&arguments),
                    }
                }))]
            }
            StreamEvent::MessageDelta {
                finish_reason,
                usage,
            } => {
                vec![self.terminal_fragment(*finish_reason, usage.as_ref())]
            }
            // The family closes streams with the finishReason fragment; no
            // sentinel follows.
            StreamEvent::MessageStop => Vec::new(),
        }
    }

    fn fragment(&self, part: Value) -> SseFrame {
        let body = json!({
            "candidates": [{
                "index": 0,
                "content": { "role": "model", "parts": [part] },
            }],
            "modelVersion": self.model,
        });
        SseFrame::data(body.to_string())
    }

    fn terminal_fragment(
        &self,
        finish_reason: Option<FinishReason>,
        usage: Option<&Usage>,
    ) -> SseFrame {
        let mut candidate = Map::new();
        candidate.insert("index".to_string(), Value::from(0));
        candidate.insert(
            "content".to_string(),
            json!({ "role": "model", "parts": [] }),
        );
        candidate.insert(
            "finishReason".to_string(),
            Value::String(
                finish_reason_to_str(finish_reason.or(Some(FinishReason::Stop))).to_string(),
            ),
        );
        let mut body = Map::new();
        body.insert(
            "candidates".to_string(),
            Value::Array(vec![Value::Object(candidate)]),
        );
        body.insert(
            "modelVersion".to_string(),
            Value::String(self.model.clone()),
        );
        if let Some(usage) = usage {
            body.insert("usageMetadata".to_string(), usage_metadata(usage));
        }
        SseFrame::data(Value::Object(body).to_string())
    }
}

fn usage_metadata(usage: &Usage) -> Value {
    let mut metadata = Map::new();
    if let Some(prompt) = usage.prompt_tokens {
        metadata.insert("promptTokenCount".to_string(), Value::from(prompt));
    }
    if let Some(completion) = usage.completion_tokens {
        metadata.insert("candidatesTokenCount".to_string(), Value::from(completion));
    }
    if let Some(total) = usage.total_tokens.or_else(|| {
        usage
            .prompt_tokens
            .zip(usage.completion_tokens)
            .map(|(p, c)| p + c)
    }) {
        metadata.insert("totalTokenCount".to_string(), Value::from(total));
    }
    Value::Object(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::stream::tests::{
        assert_well_formed, find_tool_block, json_of_block, text_of_block,
    };

    #[test]
    fn split_function_call_fragments_share_one_block() {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for fragment in [
            json!({ "candidates": [{ "content": { "role": "model", "parts": [
                { "functionCall": { "name": "get_weather" } }
            ]}}]}),
            json!({ "candidates": [{ "content": { "role": "model", "parts": [
                { "functionCall": { "name": "get_weather", "args": { "city": "Paris" } } }
            ]}}]}),
            json!({ "candidates": [{ "content": { "role": "model", "parts": [] }, "finishReason": "STOP" }] }),
        ] {
            events.extend(decoder.feed(&fragment.to_string()));
        }
        assert_well_formed(&events);
        let (index, name) = find_tool_block(&events).unwrap();
        assert_eq!(name, "get_weather");
        let args: Value = serde_json::from_str(&json_of_block(&events, index)).unwrap();
        assert_eq!(args, json!({ "city": "Paris" }));
        // STOP with a pending tool call is tool use.
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::MessageDelta {
                finish_reason: Some(FinishReason::ToolUse),
                ..
            }
        )));
    }

    #[test]
    fn text_fragments_concatenate() {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for fragment in [
            json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": "Hel" }] } }] }),
            json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": "lo" }] } }] }),
            json!({ "candidates": [{ "content": { "role": "model", "parts": [] }, "finishReason": "STOP" }],
                    "usageMetadata": { "promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6 } }),
        ] {
            events.extend(decoder.feed(&fragment.to_string()));
        }
        assert_well_formed(&events);
        assert_eq!(text_of_block(&events, 0), "Hello");
        let usage = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::MessageDelta { usage, .. } => *usage,
                _ => None,
            })
            .unwrap();
        assert_eq!(usage.total_tokens, Some(6));
    }

    #[test]
    fn encoder_buffers_tool_args_until_block_stop() {
        let mut encoder = StreamEncoder::new("gemini-1.5-pro");
        let mut frames = Vec::new();
        for event in [
            StreamEvent::MessageStart {
                id: "m".into(),
                model: "up".into(),
            },
            StreamEvent::BlockStart {
                index: 0,
                kind: BlockKind::ToolCall {
                    id: "tu_1".into(),
                    name: "get_weather".into(),
                },
            },
            StreamEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Json {
                    json: "{\"city\":".into(),
                },
            },
            StreamEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Json {
                    json: "\"Paris\"}".into(),
                },
            },
            StreamEvent::BlockStop { index: 0 },
            StreamEvent::MessageDelta {
                finish_reason: Some(FinishReason::ToolUse),
                usage: None,
            },
            StreamEvent::MessageStop,
        ] {
            frames.extend(encoder.encode(&event));
        }
        assert_eq!(frames.len(), 2);
        let call: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(
            call["candidates"][0]["content"]["parts"][0]["functionCall"]["args"],
            json!({ "city": "Paris" })
        );
        let terminal: Value = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(terminal["candidates"][0]["finishReason"], "STOP");
    }
}
