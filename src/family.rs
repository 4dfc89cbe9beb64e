use serde::{Deserialize, Serialize};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The three wire dialects the proxy translates among. They differ in shape
/// only; per-family behavior lives in small tables on this enum plus the
/// encode/decode modules keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Openai,
    Anthropic,
    Gemini,
}

impl Family {
    pub fn as_str(self) -> &'static str {
        match self {
            Family::Openai => "openai",
            Family::Anthropic => "anthropic",
            Family::Gemini => "gemini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(Family::Openai),
            "anthropic" => Some(Family::Anthropic),
            "gemini" => Some(Family::Gemini),
            _ => None,
        }
    }

    /// Path of the chat endpoint relative to a channel base URL.
    pub fn chat_path(self, model: &str, stream: bool) -> String {
        match self {
            Family::Openai => "/chat/completions".to_string(),
            Family::Anthropic => "/v1/messages".to_string(),
            Family::Gemini => {
                if stream {
                    format!("/models/{model}:streamGenerateContent?alt=sse")
                } else {
                    format!("/models/{model}:generateContent")
                }
            }
        }
    }

    /// Path of the model-listing endpoint relative to a channel base URL.
    pub fn list_models_path(self) -> &'static str {
        match self {
            Family::Openai => "/models",
            Family::Anthropic => "/v1/models",
            Family::Gemini => "/models",
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
