use crate::wire::decode::{FieldError, arguments_to_string};
use crate::wire::{
    ChatRequest, ChatResponse, FinishReason, ImageSource, Message, Part, ResponseFormat, Role,
    Thinking, ToolChoice, ToolDecl, Usage, has_tool_call,
};
use serde_json::Value;

/// The model never travels in a Gemini body; the router extracts it from the
/// `:generateContent` path segment and passes it in. `force_stream` is set
/// for the `:streamGenerateContent` form.
pub fn decode_request(
    body: &Value,
    model: &str,
    force_stream: bool,
) -> Result<ChatRequest, FieldError> {
    let obj = body
        .as_object()
        .ok_or_else(|| FieldError::new("", "request body must be a JSON object"))?;
    if model.is_empty() {
        return Err(FieldError::new("model", "missing model in request path"));
    }

    let system = obj
        .get("systemInstruction")
        .map(system_text)
        .filter(|s| !s.is_empty());

    let mut messages = Vec::new();
    let contents = obj
        .get("contents")
        .and_then(|v| v.as_array())
        .ok_or_else(|| FieldError::new("contents", "missing or not an array"))?;

    for (i, content) in contents.iter().enumerate() {
        let path = format!("contents[{i}]");
        let role = match content.get("role").and_then(|v| v.as_str()).unwrap_or("user") {
            "model" => Role::Assistant,
            _ => Role::User,
        };
        // functionResponse parts become tool-role turns of their own; the
        // pending message flushes first so part order survives.
        let mut pending = Message::new(role);

        if let Some(parts) = content.get("parts").and_then(|v| v.as_array()) {
            for (j, part) in parts.iter().enumerate() {
                let part_path = format!("{path}.parts[{j}]");
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    if part.get("thought").and_then(|v| v.as_bool()) == Some(true) {
                        pending.parts.push(Part::Thinking {
                            text: text.to_string(),
                        });
                    } else if !text.is_empty() {
                        pending.parts.push(Part::Text {
                            text: text.to_string(),
                        });
                    }
                } else if let Some(inline) = part.get("inlineData") {
                    pending.parts.push(Part::Image {
                        source: ImageSource::Base64 {
                            media_type: inline
                                .get("mimeType")
                                .and_then(|v| v.as_str())
                                .unwrap_or("image/png")
                                .to_string(),
                            data: inline
                                .get("data")
                                .and_then(|v| v.as_str())
                                .ok_or_else(|| {
                                    FieldError::new(
                                        format!("{part_path}.inlineData.data"),
                                        "missing",
                                    )
                                })?
                                .to_string(),
                        },
                    });
                } else if let Some(file) = part.get("fileData") {
                    pending.parts.push(Part::Image {
                        source: ImageSource::Url {
                            url: file
                                .get("fileUri")
                                .and_then(|v| v.as_str())
                                .ok_or_else(|| {
                                    FieldError::new(
                                        format!("{part_path}.fileData.fileUri"),
                                        "missing",
                                    )
                                })?
                                .to_string(),
                        },
                    });
                } else if let Some(call) = part.get("functionCall") {
                    let name = call
                        .get("name")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            FieldError::new(format!("{part_path}.functionCall.name"), "missing")
                        })?;
                    pending.parts.push(Part::ToolCall {
                        id: call
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or(name)
                            .to_string(),
                        name: name.to_string(),
                        arguments: arguments_to_string(call.get("args")),
                    });
                } else if let Some(response) = part.get("functionResponse") {
                    let call_id = response
                        .get("id")
                        .or_else(|| response.get("name"))
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            FieldError::new(format!("{part_path}.functionResponse.name"), "missing")
                        })?;
                    let text = response
                        .get("response")
                        .map(|r| {
                            r.get("result")
                                .or_else(|| r.get("content"))
                                .and_then(|v| v.as_str())
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| arguments_to_string(Some(r)))
                        })
                        .unwrap_or_default();
                    let mut result_parts = Vec::new();
                    if !text.is_empty() {
                        result_parts.push(Part::Text { text });
                    }
                    if !pending.parts.is_empty() {
                        messages.push(std::mem::replace(&mut pending, Message::new(role)));
                    }
                    messages.push(Message {
                        role: Role::Tool,
                        parts: vec![Part::ToolResult {
                            call_id: call_id.to_string(),
                            parts: result_parts,
                            is_error: false,
                        }],
                    });
                }
            }
        }

        if !pending.parts.is_empty() {
            messages.push(pending);
        }
    }

    let generation = obj.get("generationConfig");
    let thinking = match generation
        .and_then(|g| g.get("thinkingConfig"))
        .and_then(|t| t.get("thinkingBudget"))
        .and_then(|v| v.as_i64())
    {
        Some(budget) if budget >= 0 => Thinking::Budget {
            tokens: budget as u64,
        },
        // -1 is the family's dynamic-thinking marker.
        Some(_) => Thinking::None,
        None => Thinking::None,
    };

    let response_format = match generation
        .and_then(|g| g.get("responseMimeType"))
        .and_then(|v| v.as_str())
    {
        Some("application/json") => match generation.and_then(|g| g.get("responseSchema")) {
            Some(schema) => Some(ResponseFormat::JsonSchema {
                schema: schema.clone(),
            }),
            None => Some(ResponseFormat::JsonObject),
        },
        _ => None,
    };

    Ok(ChatRequest {
        model: model.to_string(),
        system,
        messages,
        tools: decode_tools(obj.get("tools")),
        tool_choice: decode_tool_choice(obj.get("toolConfig")),
        max_tokens: generation
            .and_then(|g| g.get("maxOutputTokens"))
            .and_then(|v| v.as_u64()),
        temperature: generation
            .and_then(|g| g.get("temperature"))
            .and_then(|v| v.as_f64()),
        top_p: generation.and_then(|g| g.get("topP")).and_then(|v| v.as_f64()),
        stop: generation
            .and_then(|g| g.get("stopSequences"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
        response_format,
        thinking,
        stream: force_stream
            || obj.get("stream").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

pub fn decode_response(body: &Value) -> Result<ChatResponse, FieldError> {
    let candidate = body
        .get("candidates")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| FieldError::new("candidates", "missing or empty"))?;

    let mut parts = Vec::new();
    if let Some(raw_parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|v| v.as_array())
    {
        for part in raw_parts {
            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                if part.get("thought").and_then(|v| v.as_bool()) == Some(true) {
                    parts.push(Part::Thinking {
                        text: text.to_string(),
                    });
                } else {
                    parts.push(Part::Text {
                        text: text.to_string(),
                    });
                }
            } else if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                parts.push(Part::ToolCall {
                    id: call
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or(name)
                        .to_string(),
                    name: name.to_string(),
                    arguments: arguments_to_string(call.get("args")),
                });
            }
        }
    }

    let finish_reason = candidate
        .get("finishReason")
        .and_then(|v| v.as_str())
        .map(|reason| finish_reason_from_str(reason, has_tool_call(&parts)));

    Ok(ChatResponse {
        id: body
            .get("responseId")
            .and_then(|v| v.as_str())
            .unwrap_or("gen")
            .to_string(),
        model: body
            .get("modelVersion")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        created: 0,
        finish_reason,
        parts,
        usage: decode_usage(body.get("usageMetadata")),
    })
}

pub fn decode_usage(usage: Option<&Value>) -> Option<Usage> {
    let usage = usage?.as_object()?;
    Some(Usage {
        prompt_tokens: usage.get("promptTokenCount").and_then(|v| v.as_u64()),
        completion_tokens: usage.get("candidatesTokenCount").and_then(|v| v.as_u64()),
        total_tokens: usage.get("totalTokenCount").and_then(|v| v.as_u64()),
    })
}

/// `STOP` with a pending function call means tool use; the family has no
/// dedicated finish reason for it.
pub fn finish_reason_from_str(reason: &str, saw_tool_call: bool) -> FinishReason {
    match reason {
        "STOP" if saw_tool_call => FinishReason::ToolUse,
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

fn system_text(instruction: &Value) -> String {
    if let Some(s) = instruction.as_str() {
        return s.to_string();
    }
    instruction
        .get("parts")
        .and_then(|v| v.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn decode_tools(tools: Option<&Value>) -> Vec<ToolDecl> {
    let Some(arr) = tools.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for tool in arr {
        let Some(declarations) = tool.get("functionDeclarations").and_then(|v| v.as_array())
        else {
            continue;
        };
        for declaration in declarations {
            let Some(name) = declaration.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            out.push(ToolDecl {
                name: name.to_string(),
                description: declaration
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                parameters: declaration.get("parameters").cloned(),
            });
        }
    }
    out
}

fn decode_tool_choice(config: Option<&Value>) -> Option<ToolChoice> {
    let calling = config?.get("functionCallingConfig")?;
    match calling.get("mode").and_then(|v| v.as_str())? {
        "NONE" => Some(ToolChoice::None),
        "ANY" => {
            let name = calling
                .get("allowedFunctionNames")
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|v| v.as_str());
            match name {
                Some(name) => Some(ToolChoice::Named {
                    name: name.to_string(),
                }),
                None => Some(ToolChoice::Required),
            }
        }
        _ => Some(ToolChoice::Auto),
    }
}
