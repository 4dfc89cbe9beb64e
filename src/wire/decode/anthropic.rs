use crate::wire::decode::{FieldError, arguments_to_string, require_str, tool_choice_from_mode};
use crate::wire::{
    ChatRequest, ChatResponse, FinishReason, ImageSource, Message, Part, Role, Thinking,
    ToolChoice, ToolDecl, Usage,
};
use serde_json::Value;

pub fn decode_request(body: &Value) -> Result<ChatRequest, FieldError> {
    let obj = body
        .as_object()
        .ok_or_else(|| FieldError::new("", "request body must be a JSON object"))?;

    let model = require_str(body, "model")?.to_string();
    let system = obj.get("system").map(system_text).filter(|s| !s.is_empty());

    let mut messages = Vec::new();
    let raw_messages = obj
        .get("messages")
        .and_then(|v| v.as_array())
        .ok_or_else(|| FieldError::new("messages", "missing or not an array"))?;

    for (i, raw) in raw_messages.iter().enumerate() {
        let path = format!("messages[{i}]");
        let role = match raw.get("role").and_then(|v| v.as_str()).unwrap_or("user") {
            "assistant" => Role::Assistant,
            _ => Role::User,
        };
        // tool_result blocks become tool-role turns of their own; flushing
        // the pending message at each one keeps block order intact.
        let mut pending = Message::new(role);

        match raw.get("content") {
            Some(Value::String(text)) => {
                if !text.is_empty() {
                    pending.parts.push(Part::Text { text: text.clone() });
                }
            }
            Some(Value::Array(blocks)) => {
                for (j, block) in blocks.iter().enumerate() {
                    let block_path = format!("{path}.content[{j}]");
                    match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                        "text" => {
                            if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                                pending.parts.push(Part::Text {
                                    text: text.to_string(),
                                });
                            }
                        }
                        "thinking" => {
                            if let Some(text) = block.get("thinking").and_then(|v| v.as_str()) {
                                pending.parts.push(Part::Thinking {
                                    text: text.to_string(),
                                });
                            }
                        }
                        "image" => {
                            pending.parts.push(Part::Image {
                                source: decode_image_source(block, &block_path)?,
                            });
                        }
                        "tool_use" => {
                            pending.parts.push(Part::ToolCall {
                                id: block
                                    .get("id")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string(),
                                name: require_str(block, "name")
                                    .map_err(|e| {
                                        FieldError::new(format!("{block_path}.name"), e.reason)
                                    })?
                                    .to_string(),
                                arguments: arguments_to_string(block.get("input")),
                            });
                        }
                        "tool_result" => {
                            let call_id = block
                                .get("tool_use_id")
                                .and_then(|v| v.as_str())
                                .ok_or_else(|| {
                                    FieldError::new(format!("{block_path}.tool_use_id"), "missing")
                                })?
                                .to_string();
                            let mut result_parts = Vec::new();
                            decode_tool_result_content(
                                block.get("content"),
                                &mut result_parts,
                                &block_path,
                            )?;
                            if !pending.parts.is_empty() {
                                messages.push(std::mem::replace(
                                    &mut pending,
                                    Message::new(role),
                                ));
                            }
                            messages.push(Message {
                                role: Role::Tool,
                                parts: vec![Part::ToolResult {
                                    call_id,
                                    parts: result_parts,
                                    is_error: block
                                        .get("is_error")
                                        .and_then(|v| v.as_bool())
                                        .unwrap_or(false),
                                }],
                            });
                        }
                        other => {
                            return Err(FieldError::new(
                                format!("{block_path}.type"),
                                format!("unsupported content block '{other}'"),
                            ));
                        }
                    }
                }
            }
            _ => {}
        }

        if !pending.parts.is_empty() {
            messages.push(pending);
        }
    }

    let tools = decode_tools(obj.get("tools"))?;
    let tool_choice = decode_tool_choice(obj.get("tool_choice"))?;

    let thinking = match obj.get("thinking").and_then(|v| v.as_object()) {
        Some(thinking) => match thinking.get("type").and_then(|v| v.as_str()) {
            Some("enabled") => Thinking::Budget {
                tokens: thinking
                    .get("budget_tokens")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| FieldError::new("thinking.budget_tokens", "missing"))?,
            },
            _ => Thinking::None,
        },
        None => Thinking::None,
    };

    Ok(ChatRequest {
        model,
        system,
        messages,
        tools,
        tool_choice,
        max_tokens: obj.get("max_tokens").and_then(|v| v.as_u64()),
        temperature: obj.get("temperature").and_then(|v| v.as_f64()),
        top_p: obj.get("top_p").and_then(|v| v.as_f64()),
        stop: obj
            .get("stop_sequences")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
        response_format: None,
        thinking,
        stream: obj.get("stream").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

pub fn decode_response(body: &Value) -> Result<ChatResponse, FieldError> {
    let mut parts = Vec::new();
    if let Some(content) = body.get("content").and_then(|v| v.as_array()) {
        for block in content {
            match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                "text" => {
                    if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                        parts.push(Part::Text {
                            text: text.to_string(),
                        });
                    }
                }
                "thinking" => {
                    if let Some(text) = block.get("thinking").and_then(|v| v.as_str()) {
                        parts.push(Part::Thinking {
                            text: text.to_string(),
                        });
                    }
                }
                "tool_use" => {
                    parts.push(Part::ToolCall {
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
                        arguments: arguments_to_string(block.get("input")),
                    });
                }
                _ => {}
            }
        }
    }

    Ok(ChatResponse {
        id: body
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("msg")
            .to_string(),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        created: 0,
        finish_reason: body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(finish_reason_from_str),
        parts,
        usage: decode_usage(body.get("usage")),
    })
}

pub fn decode_usage(usage: Option<&Value>) -> Option<Usage> {
    let usage = usage?.as_object()?;
    Some(Usage {
        prompt_tokens: usage.get("input_tokens").and_then(|v| v.as_u64()),
        completion_tokens: usage.get("output_tokens").and_then(|v| v.as_u64()),
        total_tokens: None,
    })
}

pub fn finish_reason_from_str(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolUse,
        _ => FinishReason::Other,
    }
}

fn system_text(system: &Value) -> String {
    match system {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|v| v.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn decode_image_source(block: &Value, path: &str) -> Result<ImageSource, FieldError> {
    let source = block
        .get("source")
        .ok_or_else(|| FieldError::new(format!("{path}.source"), "missing"))?;
    match source.get("type").and_then(|v| v.as_str()) {
        Some("base64") => Ok(ImageSource::Base64 {
            media_type: source
                .get("media_type")
                .and_then(|v| v.as_str())
                .unwrap_or("image/png")
                .to_string(),
            data: require_str(source, "data")
                .map_err(|e| FieldError::new(format!("{path}.source.data"), e.reason))?
                .to_string(),
        }),
        Some("url") => Ok(ImageSource::Url {
            url: require_str(source, "url")
                .map_err(|e| FieldError::new(format!("{path}.source.url"), e.reason))?
                .to_string(),
        }),
        other => Err(FieldError::new(
            format!("{path}.source.type"),
            format!("unsupported image source {other:?}"),
        )),
    }
}

fn decode_tool_result_content(
    content: Option<&Value>,
    parts: &mut Vec<Part>,
    path: &str,
) -> Result<(), FieldError> {
    match content {
        Some(Value::String(text)) => {
            if !text.is_empty() {
                parts.push(Part::Text { text: text.clone() });
            }
        }
        Some(Value::Array(blocks)) => {
            for (j, block) in blocks.iter().enumerate() {
                match block.get("type").and_then(|v| v.as_str()).unwrap_or("text") {
                    "text" => {
                        if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                            parts.push(Part::Text {
                                text: text.to_string(),
                            });
                        }
                    }
                    "image" => {
                        parts.push(Part::Image {
                            source: decode_image_source(
                                block,
                                &format!("{path}.content[{j}]"),
                            )?,
                        });
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn decode_tools(tools: Option<&Value>) -> Result<Vec<ToolDecl>, FieldError> {
    let Some(arr) = tools.and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for (i, tool) in arr.iter().enumerate() {
        out.push(ToolDecl {
            name: require_str(tool, "name")
                .map_err(|e| FieldError::new(format!("tools[{i}].name"), e.reason))?
                .to_string(),
            description: tool
                .get("description")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            parameters: tool.get("input_schema").cloned(),
        });
    }
    Ok(out)
}

fn decode_tool_choice(choice: Option<&Value>) -> Result<Option<ToolChoice>, FieldError> {
    let Some(obj) = choice.and_then(|v| v.as_object()) else {
        return Ok(None);
    };
    match obj.get("type").and_then(|v| v.as_str()) {
        Some("tool") => Ok(Some(ToolChoice::Named {
            name: obj
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| FieldError::new("tool_choice.name", "missing"))?
                .to_string(),
        })),
        Some(mode) => Ok(tool_choice_from_mode(mode)),
        None => Ok(None),
    }
}
