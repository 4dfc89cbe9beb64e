use crate::wire::decode::{
    FieldError, image_source_from_url, require_str, tool_choice_from_mode,
};
use crate::wire::{
    ChatRequest, ChatResponse, Effort, FinishReason, Message, Part, ResponseFormat, Role,
    Thinking, ToolChoice, ToolDecl, Usage,
};
use serde_json::Value;

pub fn decode_request(body: &Value) -> Result<ChatRequest, FieldError> {
    let obj = body
        .as_object()
        .ok_or_else(|| FieldError::new("", "request body must be a JSON object"))?;

    let model = require_str(body, "model")?.to_string();

    let mut system_texts: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    let raw_messages = obj
        .get("messages")
        .and_then(|v| v.as_array())
        .ok_or_else(|| FieldError::new("messages", "missing or not an array"))?;

    for (i, raw) in raw_messages.iter().enumerate() {
        let path = format!("messages[{i}]");
        let Some(msg) = raw.as_object() else {
            return Err(FieldError::new(path, "message must be an object"));
        };
        let role = msg.get("role").and_then(|v| v.as_str()).unwrap_or("user");
        match role {
            "system" | "developer" => {
                let text = content_as_text(msg.get("content"));
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            "tool" => {
                let call_id = msg
                    .get("tool_call_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| FieldError::new(format!("{path}.tool_call_id"), "missing"))?
                    .to_string();
                let parts = decode_content_parts(msg.get("content"), &path)?;
                messages.push(Message {
                    role: Role::Tool,
                    parts: vec![Part::ToolResult {
                        call_id,
                        parts,
                        is_error: false,
                    }],
                });
            }
            "assistant" => {
                let mut parts = decode_content_parts(msg.get("content"), &path)?;
                if let Some(calls) = msg.get("tool_calls").and_then(|v| v.as_array()) {
                    for (j, call) in calls.iter().enumerate() {
                        let function = call.get("function").ok_or_else(|| {
                            FieldError::new(format!("{path}.tool_calls[{j}].function"), "missing")
                        })?;
                        parts.push(Part::ToolCall {
                            id: call
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            name: require_str(function, "name")
                                .map_err(|e| {
                                    FieldError::new(
                                        format!("{path}.tool_calls[{j}].function.name"),
                                        e.reason,
                                    )
                                })?
                                .to_string(),
                            arguments: function
                                .get("arguments")
                                .and_then(|v| v.as_str())
                                .unwrap_or("{}")
                                .to_string(),
                        });
                    }
                }
                if !parts.is_empty() {
                    messages.push(Message {
                        role: Role::Assistant,
                        parts,
                    });
                }
            }
            _ => {
                let parts = decode_content_parts(msg.get("content"), &path)?;
                if !parts.is_empty() {
                    messages.push(Message {
                        role: Role::User,
                        parts,
                    });
                }
            }
        }
    }

    let tools = decode_tools(obj.get("tools"))?;
    let tool_choice = match obj.get("tool_choice") {
        Some(Value::String(mode)) => Some(tool_choice_from_mode(mode).ok_or_else(|| {
            FieldError::new("tool_choice", format!("unsupported mode '{mode}'"))
        })?),
        Some(Value::Object(choice)) => {
            let name = choice
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| FieldError::new("tool_choice.function.name", "missing"))?;
            Some(ToolChoice::Named {
                name: name.to_string(),
            })
        }
        _ => None,
    };

    let thinking = match obj.get("reasoning_effort").and_then(|v| v.as_str()) {
        Some("low") => Thinking::Effort {
            effort: Effort::Low,
        },
        Some("medium") => Thinking::Effort {
            effort: Effort::Medium,
        },
        Some("high") => Thinking::Effort {
            effort: Effort::High,
        },
        Some(other) => {
            return Err(FieldError::new(
                "reasoning_effort",
                format!("unsupported effort '{other}'"),
            ));
        }
        None => Thinking::None,
    };

    let response_format = match obj
        .get("response_format")
        .and_then(|v| v.get("type"))
        .and_then(|v| v.as_str())
    {
        Some("json_object") => Some(ResponseFormat::JsonObject),
        Some("json_schema") => {
            let schema = obj
                .get("response_format")
                .and_then(|v| v.get("json_schema"))
                .and_then(|v| v.get("schema"))
                .cloned()
                .ok_or_else(|| {
                    FieldError::new("response_format.json_schema.schema", "missing")
                })?;
            Some(ResponseFormat::JsonSchema { schema })
        }
        _ => None,
    };

    Ok(ChatRequest {
        model,
        system: if system_texts.is_empty() {
            None
        } else {
            Some(system_texts.join("\n"))
        },
        messages,
        tools,
        tool_choice,
        max_tokens: obj
            .get("max_tokens")
            .or_else(|| obj.get("max_completion_tokens"))
            .and_then(|v| v.as_u64()),
        temperature: obj.get("temperature").and_then(|v| v.as_f64()),
        top_p: obj.get("top_p").and_then(|v| v.as_f64()),
        stop: decode_stop(obj.get("stop")),
        response_format,
        thinking,
        stream: obj.get("stream").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

pub fn decode_response(body: &Value) -> Result<ChatResponse, FieldError> {
    let choice = body
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| FieldError::new("choices", "missing or empty"))?;
    let message = choice
        .get("message")
        .ok_or_else(|| FieldError::new("choices[0].message", "missing"))?;

    let mut parts = Vec::new();
    if let Some(text) = message.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            parts.push(Part::Text {
                text: text.to_string(),
            });
        }
    }
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let Some(function) = call.get("function") else {
                continue;
            };
            parts.push(Part::ToolCall {
                id: call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name: function
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                arguments: function
                    .get("arguments")
                    .and_then(|v| v.as_str())
                    .unwrap_or("{}")
                    .to_string(),
            });
        }
    }

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(finish_reason_from_str);

    Ok(ChatResponse {
        id: body
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("chatcmpl")
            .to_string(),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        created: body.get("created").and_then(|v| v.as_i64()).unwrap_or(0),
        finish_reason,
        parts,
        usage: decode_usage(body.get("usage")),
    })
}

pub fn decode_usage(usage: Option<&Value>) -> Option<Usage> {
    let usage = usage?.as_object()?;
    Some(Usage {
        prompt_tokens: usage.get("prompt_tokens").and_then(|v| v.as_u64()),
        completion_tokens: usage.get("completion_tokens").and_then(|v| v.as_u64()),
        total_tokens: usage.get("total_tokens").and_then(|v| v.as_u64()),
    })
}

pub fn finish_reason_from_str(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolUse,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

fn decode_tools(tools: Option<&Value>) -> Result<Vec<ToolDecl>, FieldError> {
    let Some(arr) = tools.and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for (i, tool) in arr.iter().enumerate() {
        let function = tool
            .get("function")
            .ok_or_else(|| FieldError::new(format!("tools[{i}].function"), "missing"))?;
        out.push(ToolDecl {
            name: require_str(function, "name")
                .map_err(|e| FieldError::new(format!("tools[{i}].function.name"), e.reason))?
                .to_string(),
            description: function
                .get("description")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            parameters: function.get("parameters").cloned(),
        });
    }
    Ok(out)
}

fn decode_stop(stop: Option<&Value>) -> Vec<String> {
    match stop {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

fn content_as_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(arr)) => {
            let mut out = String::new();
            for item in arr {
                if let Some(t) = item.get("text").and_then(|v| v.as_str()) {
                    out.push_str(t);
                }
            }
            out
        }
        _ => String::new(),
    }
}

fn decode_content_parts(content: Option<&Value>, path: &str) -> Result<Vec<Part>, FieldError> {
    let mut parts = Vec::new();
    match content {
        Some(Value::String(s)) => {
            if !s.is_empty() {
                parts.push(Part::Text { text: s.clone() });
            }
        }
        Some(Value::Array(arr)) => {
            for (i, item) in arr.iter().enumerate() {
                match item.get("type").and_then(|v| v.as_str()).unwrap_or("text") {
                    "text" => {
                        if let Some(t) = item.get("text").and_then(|v| v.as_str()) {
                            parts.push(Part::Text {
                                text: t.to_string(),
                            });
                        }
                    }
                    "image_url" => {
                        let url = item
                            .get("image_url")
                            .and_then(|v| v.get("url"))
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| {
                                FieldError::new(
                                    format!("{path}.content[{i}].image_url.url"),
                                    "missing",
                                )
                            })?;
                        parts.push(Part::Image {
                            source: image_source_from_url(url),
                        });
                    }
                    other => {
                        return Err(FieldError::new(
                            format!("{path}.content[{i}].type"),
                            format!("unsupported content type '{other}'"),
                        ));
                    }
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(_) => {
            return Err(FieldError::new(
                format!("{path}.content"),
                "must be a string or an array of parts",
            ));
        }
    }
    Ok(parts)
}
