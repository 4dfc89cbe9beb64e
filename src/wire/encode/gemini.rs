use crate::family::Family;
use crate::wire::encode::{EgressOptions, arguments_to_value};
use crate::wire::{
    ChatRequest, ChatResponse, FinishReason, ImageSource, Part, ResponseFormat, Role, Thinking,
    ToolChoice,
};
use serde_json::{Map, Value, json};

pub fn encode_request(req: &ChatRequest, opts: &EgressOptions) -> Value {
    let mut contents: Vec<Value> = Vec::new();
    for message in &req.messages {
        let role = match message.role {
            Role::Assistant => "model",
            _ => "user",
        };
        let parts = encode_parts(&message.parts);
        if parts.is_empty() {
            continue;
        }
        contents.push(json!({ "role": role, "parts": parts }));
    }

    let mut body = json!({ "contents": contents });
    let obj = body.as_object_mut().expect("gemini request object");

    if let Some(system) = &req.system {
        obj.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system }] }),
        );
    }

    let mut generation = Map::new();
    if let Some(temperature) = req.temperature {
        generation.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = req.top_p {
        generation.insert("topP".to_string(), Value::from(top_p));
    }
    if let Some(max_tokens) = req.max_tokens {
        generation.insert("maxOutputTokens".to_string(), Value::from(max_tokens));
    }
    if !req.stop.is_empty() {
        generation.insert("stopSequences".to_string(), json!(req.stop));
    }
    match &req.response_format {
        Some(ResponseFormat::JsonObject) => {
            generation.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
        }
        Some(ResponseFormat::JsonSchema { schema }) => {
            generation.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
            generation.insert("responseSchema".to_string(), schema.clone());
        }
        None => {}
    }
    match req.thinking {
        Thinking::None => {}
        Thinking::Effort { effort } => {
            let budget = opts.thinking.effort_to_budget(effort, Family::Gemini);
            generation.insert(
                "thinkingConfig".to_string(),
                json!({ "thinkingBudget": budget }),
            );
        }
        Thinking::Budget { tokens } => {
            generation.insert(
                "thinkingConfig".to_string(),
                json!({ "thinkingBudget": tokens }),
            );
        }
    }
    if !generation.is_empty() {
        obj.insert("generationConfig".to_string(), Value::Object(generation));
    }

    if !req.tools.is_empty() {
        let declarations: Vec<Value> = req
            .tools
            .iter()
            .map(|tool| {
                let mut declaration = Map::new();
                declaration.insert("name".to_string(), Value::String(tool.name.clone()));
                if let Some(description) = &tool.description {
                    declaration.insert(
                        "description".to_string(),
                        Value::String(description.clone()),
                    );
                }
                if let Some(parameters) = &tool.parameters {
                    declaration.insert("parameters".to_string(), parameters.clone());
                }
                Value::Object(declaration)
            })
            .collect();
        obj.insert(
            "tools".to_string(),
            json!([{ "functionDeclarations": declarations }]),
        );
    }

    if let Some(choice) = &req.tool_choice {
        obj.insert(
            "toolConfig".to_string(),
            json!({ "functionCallingConfig": encode_tool_choice(choice) }),
        );
    }

    body
}

pub fn encode_response(resp: &ChatResponse, client_model: &str) -> Value {
    let mut parts = Vec::new();
    for part in &resp.parts {
        match part {
            Part::Text { text } => parts.push(json!({ "text": text })),
            Part::Thinking { text } => parts.push(json!({ "text": text, "thought": true })),
            Part::ToolCall {
                id,
                name,
                arguments,
            } => {
                parts.push(json!({
                    "functionCall": {
                        "id": id,
                        "name": name,
                        "args": arguments_to_value(arguments),
                    }
                }));
            }
            Part::Image { .. } | Part::ToolResult { .. } => {}
        }
    }

    let mut body = json!({
        "candidates": [{
            "index": 0,
            "content": { "role": "model", "parts": parts },
            "finishReason": finish_reason_to_str(resp.finish_reason),
        }],
        "modelVersion": client_model,
    });
    if let Some(usage) = &resp.usage {
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
        body.as_object_mut()
            .expect("gemini response object")
            .insert("usageMetadata".to_string(), Value::Object(metadata));
    }
    body
}

pub fn finish_reason_to_str(reason: Option<FinishReason>) -> &'static str {
    match reason {
        Some(FinishReason::Length) => "MAX_TOKENS",
        Some(FinishReason::ContentFilter) => "SAFETY",
        Some(FinishReason::Other) => "OTHER",
        _ => "STOP",
    }
}

fn encode_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({ "mode": "AUTO" }),
        ToolChoice::None => json!({ "mode": "NONE" }),
        ToolChoice::Required => json!({ "mode": "ANY" }),
        ToolChoice::Named { name } => {
            json!({ "mode": "ANY", "allowedFunctionNames": [name] })
        }
    }
}

fn encode_parts(parts: &[Part]) -> Vec<Value> {
    let mut out = Vec::new();
    for part in parts {
        match part {
            Part::Text { text } => out.push(json!({ "text": text })),
            Part::Thinking { text } => out.push(json!({ "text": text, "thought": true })),
            Part::Image { source } => out.push(encode_image(source)),
            Part::ToolCall {
                id,
                name,
                arguments,
            } => {
                out.push(json!({
                    "functionCall": {
                        "id": id,
                        "name": name,
                        "args": arguments_to_value(arguments),
                    }
                }));
            }
            Part::ToolResult {
                call_id,
                parts,
                is_error,
            } => {
                out.push(json!({
                    "functionResponse": {
                        "name": call_id,
                        "response": {
                            "result": crate::wire::text_of(parts),
                            "is_error": is_error,
                        }
                    }
                }));
            }
        }
    }
    out
}

fn encode_image(source: &ImageSource) -> Value {
    match source {
        ImageSource::Url { url } => {
            json!({ "fileData": { "mimeType": "image/*", "fileUri": url } })
        }
        ImageSource::Base64 { media_type, data } => {
            json!({ "inlineData": { "mimeType": media_type, "data": data } })
        }
    }
}
