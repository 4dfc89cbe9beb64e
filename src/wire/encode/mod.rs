pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::family::Family;
use crate::thinking::ThinkingConfig;
use crate::wire::{ImageSource, Part};
use serde_json::{Value, json};

/// Knobs the egress encoders need beyond the neutral request itself: which
/// family the request came from (threshold selection), the thinking table and
/// the configured token defaults.
#[derive(Debug, Clone)]
pub struct EgressOptions<'a> {
    pub source: Family,
    pub thinking: &'a ThinkingConfig,
    pub anthropic_max_tokens: u64,
    pub openai_reasoning_max_tokens: u64,
}

pub fn text_parts(parts: &[Part]) -> String {
    let mut out = String::new();
    for part in parts {
        if let Part::Text { text } = part {
            out.push_str(text);
        }
    }
    out
}

/// Tool-call arguments are carried as raw JSON text; materialize them back
/// into a value for families whose wire form is an object.
pub fn arguments_to_value(arguments: &str) -> Value {
    serde_json::from_str(arguments).unwrap_or_else(|_| json!({}))
}

/// Inline image data as an OpenAI-style data URL.
pub fn image_source_to_data_url(source: &ImageSource) -> String {
    match source {
        ImageSource::Url { url } => url.clone(),
        ImageSource::Base64 { media_type, data } => {
            format!("data:{media_type};base64,{data}")
        }
    }
}
