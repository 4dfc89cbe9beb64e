pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::wire::{ImageSource, ToolChoice};
use serde_json::Value;

/// Parse failure with the path of the offending field, surfaced to the
/// client as a 400 with that path in the error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

pub fn require_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, FieldError> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FieldError::new(key, "missing or empty"))
}

/// Split `data:<media_type>;base64,<payload>` URLs into an inline source so
/// egress encoders can re-emit them in whichever shape the target family
/// wants. Anything else stays a URL.
pub fn image_source_from_url(url: &str) -> ImageSource {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((header, data)) = rest.split_once(";base64,") {
            return ImageSource::Base64 {
                media_type: if header.is_empty() {
                    "image/png".to_string()
                } else {
                    header.to_string()
                },
                data: data.to_string(),
            };
        }
    }
    ImageSource::Url {
        url: url.to_string(),
    }
}

pub fn tool_choice_from_mode(mode: &str) -> Option<ToolChoice> {
    match mode {
        "auto" => Some(ToolChoice::Auto),
        "none" => Some(ToolChoice::None),
        "required" | "any" => Some(ToolChoice::Required),
        _ => Option::None,
    }
}

/// Stringify a tool-call `input`/`args` object exactly once, preserving the
/// upstream key order via serde_json's representation.
pub fn arguments_to_string(value: Option<&Value>) -> String {
    match value {
        Some(v) => serde_json::to_string(v).unwrap_or_else(|_| "{}".to_string()),
        None => "{}".to_string(),
    }
}
