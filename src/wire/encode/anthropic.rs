use crate::family::Family;
use crate::wire::encode::{EgressOptions, arguments_to_value};
use crate::wire::{
    ChatRequest, ChatResponse, FinishReason, ImageSource, Part, Role, Thinking, ToolChoice,
};
use serde_json::{Map, Value, json};

pub fn encode_request(req: &ChatRequest, upstream_model: &str, opts: &EgressOptions) -> Value {
    let mut messages: Vec<Value> = Vec::new();
    for message in &req.messages {
        let (role, content) = match message.role {
            Role::Assistant => ("assistant", encode_blocks(&message.parts)),
            Role::Tool => ("user", encode_tool_result_blocks(&message.parts)),
            Role::User => ("user", encode_blocks(&message.parts)),
        };
        if content.is_empty() {
            continue;
        }
        // The family rejects consecutive same-role turns; fold them together
        // keeping block order.
        if let Some(last) = messages.last_mut() {
            if last.get("role").and_then(|v| v.as_str()) == Some(role) {
                if let Some(existing) = last.get_mut("content").and_then(|v| v.as_array_mut()) {
                    existing.extend(content);
                    continue;
                }
            }
        }
        messages.push(json!({ "role": role, "content": content }));
    }

    let mut body = json!({
        "model": upstream_model,
        "messages": messages,
        "max_tokens": req.max_tokens.unwrap_or(opts.anthropic_max_tokens),
    });
    let obj = body.as_object_mut().expect("messages request object");

    if let Some(system) = &req.system {
        obj.insert("system".to_string(), Value::String(system.clone()));
    }
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
        obj.insert("stop_sequences".to_string(), json!(req.stop));
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters.clone().unwrap_or_else(|| json!({
                        "type": "object",
                        "properties": {}
                    })),
                })
            })
            .collect();
        obj.insert("tools".to_string(), Value::Array(tools));
    }
    if let Some(choice) = &req.tool_choice {
        obj.insert("tool_choice".to_string(), encode_tool_choice(choice));
    }
    match req.thinking {
        Thinking::None => {}
        Thinking::Effort { effort } => {
            let budget = opts.thinking.effort_to_budget(effort, Family::Anthropic);
            obj.insert(
                "thinking".to_string(),
                json!({ "type": "enabled", "budget_tokens": budget }),
            );
        }
        Thinking::Budget { tokens } => {
            obj.insert(
                "thinking".to_string(),
                json!({ "type": "enabled", "budget_tokens": tokens }),
            );
        }
    }

    body
}

pub fn encode_response(resp: &ChatResponse, client_model: &str) -> Value {
    let mut content = Vec::new();
    for part in &resp.parts {
        match part {
            Part::Thinking { text } => {
                content.push(json!({ "type": "thinking", "thinking": text }));
            }
            Part::Text { text } => {
                content.push(json!({ "type": "text", "text": text }));
            }
            Part::ToolCall {
                id,
                name,
                arguments,
            } => {
                content.push(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": arguments_to_value(arguments),
                }));
            }
            Part::Image { .. } | Part::ToolResult { .. } => {}
        }
    }

    json!({
        "id": resp.id,
        "type": "message",
        "role": "assistant",
        "model": client_model,
        "content": content,
        "stop_reason": stop_reason_to_str(resp.finish_reason),
        "stop_sequence": Value::Null,
        "usage": {
            "input_tokens": resp.usage.and_then(|u| u.prompt_tokens),
            "output_tokens": resp.usage.and_then(|u| u.completion_tokens),
        },
    })
}

pub fn stop_reason_to_str(reason: Option<FinishReason>) -> &'static str {
    match reason {
        Some(FinishReason::Length) => "max_tokens",
        Some(FinishReason::ToolUse) => "tool_use",
        _ => "end_turn",
    }
}

fn encode_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({ "type": "auto" }),
        ToolChoice::None => json!({ "type": "none" }),
        ToolChoice::Required => json!({ "type": "any" }),
        ToolChoice::Named { name } => json!({ "type": "tool", "name": name }),
    }
}

fn encode_blocks(parts: &[Part]) -> Vec<Value> {
    let mut out = Vec::new();
    for part in parts {
        match part {
            Part::Text { text } => out.push(json!({ "type": "text", "text": text })),
            Part::Thinking { text } => {
                out.push(json!({ "type": "thinking", "thinking": text }));
            }
            Part::Image { source } => out.push(encode_image(source)),
            Part::ToolCall {
                id,
                name,
                arguments,
            } => {
                out.push(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": arguments_to_value(arguments),
                }));
            }
            Part::ToolResult { .. } => {}
        }
    }
    out
}

fn encode_tool_result_blocks(parts: &[Part]) -> Vec<Value> {
    let mut out = Vec::new();
    for part in parts {
        if let Part::ToolResult {
            call_id,
            parts,
            is_error,
        } = part
        {
            let mut content = Vec::new();
            for inner in parts {
                match inner {
                    Part::Text { text } => content.push(json!({ "type": "text", "text": text })),
                    Part::Image { source } => content.push(encode_image(source)),
                    _ => {}
                }
            }
            let mut block = Map::new();
            block.insert("type".to_string(), Value::String("tool_result".to_string()));
            block.insert("tool_use_id".to_string(), Value::String(call_id.clone()));
            if *is_error {
                block.insert("is_error".to_string(), Value::Bool(true));
            }
            block.insert("content".to_string(), Value::Array(content));
            out.push(Value::Object(block));
        }
    }
    out
}

fn encode_image(source: &ImageSource) -> Value {
    match source {
        ImageSource::Url { url } => json!({
            "type": "image",
            "source": { "type": "url", "url": url }
        }),
        ImageSource::Base64 { media_type, data } => json!({
            "type": "image",
            "source": { "type": "base64", "media_type": media_type, "data": data }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thinking::ThinkingConfig;
    use crate::wire::{Effort, Message};

    fn opts(thinking: &ThinkingConfig) -> EgressOptions<'_> {
        EgressOptions {
            source: Family::Openai,
            thinking,
            anthropic_max_tokens: 32000,
            openai_reasoning_max_tokens: 32000,
        }
    }

    fn base_request() -> ChatRequest {
        ChatRequest {
            model: "claude-3-5-sonnet".into(),
            system: Some("Be terse.".into()),
            messages: vec![Message::text(Role::User, "2+2?")],
            tools: Vec::new(),
            tool_choice: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
            response_format: None,
            thinking: Thinking::None,
            stream: false,
        }
    }

    #[test]
    fn max_tokens_defaults_when_absent() {
        let thinking = ThinkingConfig::default();
        let body = encode_request(&base_request(), "claude-3-5-sonnet", &opts(&thinking));
        assert_eq!(body["max_tokens"], 32000);
        assert_eq!(body["system"], "Be terse.");
    }

    #[test]
    fn consecutive_same_role_turns_merge() {
        let thinking = ThinkingConfig::default();
        let mut req = base_request();
        req.messages = vec![
            Message::text(Role::User, "one"),
            Message::text(Role::User, "two"),
            Message::text(Role::Assistant, "three"),
        ];
        let body = encode_request(&req, "claude-3-5-sonnet", &opts(&thinking));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn tool_result_turn_merges_into_user_turn() {
        let thinking = ThinkingConfig::default();
        let mut req = base_request();
        req.messages = vec![
            Message {
                role: Role::Tool,
                parts: vec![Part::ToolResult {
                    call_id: "call_1".into(),
                    parts: vec![Part::Text { text: "42".into() }],
                    is_error: false,
                }],
            },
            Message::text(Role::User, "thanks"),
        ];
        let body = encode_request(&req, "claude-3-5-sonnet", &opts(&thinking));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        let content = messages[0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "tool_result");
        assert_eq!(content[1]["type"], "text");
    }

    #[test]
    fn effort_uses_configured_budget() {
        let thinking = ThinkingConfig::default();
        let mut req = base_request();
        req.thinking = Thinking::Effort {
            effort: Effort::Medium,
        };
        let body = encode_request(&req, "claude-3-5-sonnet", &opts(&thinking));
        assert_eq!(body["thinking"]["budget_tokens"], 8192);
    }
}
