use crate::wire::encode::{EgressOptions, image_source_to_data_url};
use crate::wire::{
    ChatRequest, ChatResponse, FinishReason, Message, Part, ResponseFormat, Role, Thinking,
    ToolChoice, Usage,
};
use serde_json::{Map, Value, json};

pub fn encode_request(req: &ChatRequest, upstream_model: &str, opts: &EgressOptions) -> Value {
    let mut messages: Vec<Value> = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for message in &req.messages {
        match message.role {
            Role::Tool => messages.extend(encode_tool_messages(message)),
            Role::User => messages.push(encode_user_message(message)),
            Role::Assistant => messages.push(encode_assistant_message(message)),
        }
    }

    let mut body = json!({
        "model": upstream_model,
        "messages": messages,
    });
    let obj = body.as_object_mut().expect("chat request object");

    if req.stream {
        obj.insert("stream".to_string(), Value::Bool(true));
    }
    if let Some(temperature) = req.temperature {
        obj.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = req.top_p {
        obj.insert("top_p".to_string(), Value::from(top_p));
    }
    if !req.stop.is_empty() {
        obj.insert("stop".to_string(), json!(req.stop));
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters.clone().unwrap_or_else(|| json!({
                            "type": "object",
                            "properties": {}
                        })),
                    }
                })
            })
            .collect();
        obj.insert("tools".to_string(), Value::Array(tools));
    }
    if let Some(choice) = &req.tool_choice {
        obj.insert("tool_choice".to_string(), encode_tool_choice(choice));
    }
    match &req.response_format {
        Some(ResponseFormat::JsonObject) => {
            obj.insert("response_format".to_string(), json!({ "type": "json_object" }));
        }
        Some(ResponseFormat::JsonSchema { schema }) => {
            obj.insert(
                "response_format".to_string(),
                json!({
                    "type": "json_schema",
                    "json_schema": { "name": "response", "schema": schema }
                }),
            );
        }
        None => {}
    }

    // Reasoning requests switch the token cap to max_completion_tokens with
    // the configured fallback; plain requests keep max_tokens.
    match req.thinking {
        Thinking::None => {
            if let Some(max_tokens) = req.max_tokens {
                obj.insert("max_tokens".to_string(), Value::from(max_tokens));
            }
        }
        Thinking::Effort { effort } => {
            obj.insert(
                "reasoning_effort".to_string(),
                Value::String(effort.as_str().to_string()),
            );
            obj.insert(
                "max_completion_tokens".to_string(),
                Value::from(req.max_tokens.unwrap_or(opts.openai_reasoning_max_tokens)),
            );
        }
        Thinking::Budget { tokens } => {
            let effort = opts.thinking.budget_to_effort(tokens, opts.source);
            obj.insert(
                "reasoning_effort".to_string(),
                Value::String(effort.as_str().to_string()),
            );
            obj.insert(
                "max_completion_tokens".to_string(),
                Value::from(req.max_tokens.unwrap_or(opts.openai_reasoning_max_tokens)),
            );
        }
    }

    body
}

pub fn encode_response(resp: &ChatResponse, client_model: &str) -> Value {
    let text = crate::wire::text_of(&resp.parts);
    let tool_calls: Vec<Value> = resp
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::ToolCall {
                id,
                name,
                arguments,
            } => Some(json!({
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": arguments }
            })),
            _ => None,
        })
        .collect();

    let mut message = Map::new();
    message.insert("role".to_string(), Value::String("assistant".to_string()));
    message.insert(
        "content".to_string(),
        if text.is_empty() && !tool_calls.is_empty() {
            Value::Null
        } else {
            Value::String(text)
        },
    );
    if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }

    json!({
        "id": resp.id,
        "object": "chat.completion",
        "created": resp.created,
        "model": client_model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason_to_str(resp.finish_reason),
        }],
        "usage": encode_usage(resp.usage.as_ref()),
    })
}

pub fn encode_usage(usage: Option<&Usage>) -> Value {
    match usage {
        Some(usage) => json!({
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens,
        }),
        None => Value::Null,
    }
}

pub fn finish_reason_to_str(reason: Option<FinishReason>) -> &'static str {
    match reason {
        Some(FinishReason::Length) => "length",
        Some(FinishReason::ToolUse) => "tool_calls",
        Some(FinishReason::ContentFilter) => "content_filter",
        _ => "stop",
    }
}

fn encode_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".to_string()),
        ToolChoice::None => Value::String("none".to_string()),
        ToolChoice::Required => Value::String("required".to_string()),
        ToolChoice::Named { name } => json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

fn encode_user_message(message: &Message) -> Value {
    let needs_array = message
        .parts
        .iter()
        .any(|p| matches!(p, Part::Image { .. }));
    if !needs_array {
        return json!({
            "role": "user",
            "content": crate::wire::text_of(&message.parts)
        });
    }
    let mut content = Vec::new();
    for part in &message.parts {
        match part {
            Part::Text { text } => content.push(json!({ "type": "text", "text": text })),
            Part::Image { source } => content.push(json!({
                "type": "image_url",
                "image_url": { "url": image_source_to_data_url(source) }
            })),
            _ => {}
        }
    }
    json!({ "role": "user", "content": content })
}

fn encode_assistant_message(message: &Message) -> Value {
    let text = crate::wire::text_of(&message.parts);
    let tool_calls: Vec<Value> = message
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::ToolCall {
                id,
                name,
                arguments,
            } => Some(json!({
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": arguments }
            })),
            _ => None,
        })
        .collect();

    let mut msg = Map::new();
    msg.insert("role".to_string(), Value::String("assistant".to_string()));
    msg.insert(
        "content".to_string(),
        if text.is_empty() && !tool_calls.is_empty() {
            Value::Null
        } else {
            Value::String(text)
        },
    );
    if !tool_calls.is_empty() {
        msg.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }
    Value::Object(msg)
}

/// A neutral tool turn may carry several results; the chat shape wants one
/// `tool` message per call id.
fn encode_tool_messages(message: &Message) -> Vec<Value> {
    let mut out = Vec::new();
    for part in &message.parts {
        if let Part::ToolResult { call_id, parts, .. } = part {
            out.push(json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": crate::wire::text_of(parts),
            }));
        }
    }
    out
}
