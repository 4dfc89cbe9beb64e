//! Streaming translation as two independent state machines per family: a
//! decoder that turns the family's SSE events into the neutral
//! [`StreamEvent`](crate::wire::StreamEvent) sequence, and an encoder that
//! renders neutral events back into the family's SSE frames. The handler
//! glues an upstream decoder to a client-side encoder; the machines never
//! touch the network, which keeps both directions testable in isolation.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::family::Family;
use crate::wire::StreamEvent;
use serde_json::json;

/// One outgoing SSE frame. `event` becomes the `event:` line when set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }
}

/// Family-dispatched decoder: upstream SSE data → neutral events.
pub enum Decoder {
    Openai(openai::StreamDecoder),
    Anthropic(anthropic::StreamDecoder),
    Gemini(gemini::StreamDecoder),
}

impl Decoder {
    pub fn for_family(family: Family) -> Self {
        match family {
            Family::Openai => Decoder::Openai(openai::StreamDecoder::new()),
            Family::Anthropic => Decoder::Anthropic(anthropic::StreamDecoder::new()),
            Family::Gemini => Decoder::Gemini(gemini::StreamDecoder::new()),
        }
    }

    pub fn feed(&mut self, data: &str) -> Vec<StreamEvent> {
        match self {
            Decoder::Openai(decoder) => decoder.feed(data),
            Decoder::Anthropic(decoder) => decoder.feed(data),
            Decoder::Gemini(decoder) => decoder.feed(data),
        }
    }

    pub fn finish(&mut self) -> Vec<StreamEvent> {
        match self {
            Decoder::Openai(decoder) => decoder.finish(),
            Decoder::Anthropic(decoder) => decoder.finish(),
            Decoder::Gemini(decoder) => decoder.finish(),
        }
    }
}

/// Family-dispatched encoder: neutral events → client-family SSE frames.
pub enum Encoder {
    Openai(openai::StreamEncoder),
    Anthropic(anthropic::StreamEncoder),
    Gemini(gemini::StreamEncoder),
}

impl Encoder {
    pub fn for_family(family: Family, client_model: &str) -> Self {
        match family {
            Family::Openai => Encoder::Openai(openai::StreamEncoder::new(client_model)),
            Family::Anthropic => Encoder::Anthropic(anthropic::StreamEncoder::new(client_model)),
            Family::Gemini => Encoder::Gemini(gemini::StreamEncoder::new(client_model)),
        }
    }

    pub fn encode(&mut self, event: &StreamEvent) -> Vec<SseFrame> {
        match self {
            Encoder::Openai(encoder) => encoder.encode(event),
            Encoder::Anthropic(encoder) => encoder.encode(event),
            Encoder::Gemini(encoder) => encoder.encode(event),
        }
    }

    /// Error frame for a failure after the first streamed byte; the status
    /// line is already gone, so the error rides inside the stream. The
    /// caller follows up with the normal close sequence.
    pub fn error_frames(&self, code: &str, message: &str) -> Vec<SseFrame> {
        match self {
            Encoder::Openai(_) => vec![SseFrame::data(
                json!({
                    "error": { "message": message, "type": "api_error", "code": code }
                })
                .to_string(),
            )],
            Encoder::Anthropic(encoder) => vec![encoder.error_frame(code, message)],
            Encoder::Gemini(_) => vec![SseFrame::data(
                json!({
                    "promptFeedback": { "blockReason": "OTHER", "blockReasonMessage": message }
                })
                .to_string(),
            )],
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::wire::{BlockDelta, BlockKind, StreamEvent};

    /// Property checks shared by all decoders: every delta lands in an open
    /// block, blocks close exactly once, exactly one MessageStop at the end.
    pub(crate) fn assert_well_formed(events: &[StreamEvent]) {
        let mut open = std::collections::HashSet::new();
        let mut stops = 0;
        for event in events {
            match event {
                StreamEvent::BlockStart { index, .. } => {
                    assert!(open.insert(*index), "block {index} opened twice");
                }
                StreamEvent::BlockDelta { index, .. } => {
                    assert!(open.contains(index), "delta on unopened block {index}");
                }
                StreamEvent::BlockStop { index } => {
                    assert!(open.remove(index), "stop on unopened block {index}");
                }
                StreamEvent::MessageStop => stops += 1,
                _ => {}
            }
        }
        assert!(open.is_empty(), "blocks left open: {open:?}");
        assert_eq!(stops, 1, "expected exactly one MessageStop");
    }

    pub(crate) fn text_of_block(events: &[StreamEvent], index: u32) -> String {
        let mut out = String::new();
        for event in events {
            if let StreamEvent::BlockDelta {
                index: i,
                delta: BlockDelta::Text { text },
            } = event
            {
                if *i == index {
                    out.push_str(text);
                }
            }
        }
        out
    }

    pub(crate) fn json_of_block(events: &[StreamEvent], index: u32) -> String {
        let mut out = String::new();
        for event in events {
            if let StreamEvent::BlockDelta {
                index: i,
                delta: BlockDelta::Json { json },
            } = event
            {
                if *i == index {
                    out.push_str(json);
                }
            }
        }
        out
    }

    pub(crate) fn find_tool_block(events: &[StreamEvent]) -> Option<(u32, String)> {
        events.iter().find_map(|event| match event {
            StreamEvent::BlockStart {
                index,
                kind: BlockKind::ToolCall { name, .. },
            } => Some((*index, name.clone())),
            _ => None,
        })
    }
}
