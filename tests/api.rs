use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::routing::{get, post};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;
use trialect::channels::NewChannel;
use trialect::family::Family;

#[derive(Default)]
struct Captured {
    bodies: Vec<(String, Value)>,
    headers: Vec<(String, String)>,
    attempts: HashMap<String, u32>,
}

type Shared = Arc<Mutex<Captured>>;

struct TestContext {
    router: Router,
    state: trialect::app::AppState,
    captured: Shared,
    _temp_dir: TempDir,
}

impl TestContext {
    fn upstream_bodies(&self, endpoint: &str) -> Vec<Value> {
        self.captured
            .lock()
            .unwrap()
            .bodies
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, b)| b.clone())
            .collect()
    }

    fn upstream_header(&self, name: &str) -> Option<String> {
        self.captured
            .lock()
            .unwrap()
            .headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

fn capture_headers(captured: &Shared, headers: &axum::http::HeaderMap) {
    for name in ["anthropic-version", "x-goog-api-key", "x-api-key", "authorization"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            captured
                .lock()
                .unwrap()
                .headers
                .push((name.to_string(), value.to_string()));
        }
    }
}

/// Models with reserved names drive upstream failure behavior so tests can
/// exercise the retry policy without extra body fields (which would not
/// survive translation).
fn forced_failure(captured: &Shared, model: &str) -> Option<axum::response::Response> {
    match model {
        "retry-twice" => {
            let mut lock = captured.lock().unwrap();
            let count = lock.attempts.entry(model.to_string()).or_insert(0);
            *count += 1;
            if *count <= 2 {
                Some(
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(json!({ "error": { "message": "upstream overloaded" } })),
                    )
                        .into_response(),
                )
            } else {
                None
            }
        }
        "always-400" => Some(
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "message": "model is broken", "type": "invalid_request_error" } })),
            )
                .into_response(),
        ),
        _ => None,
    }
}

fn chat_text(messages: &[Value]) -> String {
    let mut out = String::new();
    for msg in messages {
        match msg.get("content") {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Array(parts)) => {
                for part in parts {
                    if let Some(t) = part.get("text").and_then(|v| v.as_str()) {
                        out.push_str(t);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

async fn start_upstream() -> (SocketAddr, Shared) {
    let captured: Shared = Arc::new(Mutex::new(Captured::default()));

    async fn chat_completions(
        axum::extract::State(captured): axum::extract::State<Shared>,
        headers: axum::http::HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        capture_headers(&captured, &headers);
        let model = body.get("model").and_then(|v| v.as_str()).unwrap_or("mock");
        if let Some(resp) = forced_failure(&captured, model) {
            return resp;
        }
        captured
            .lock()
            .unwrap()
            .bodies
            .push(("chat".to_string(), body.clone()));
        let messages = body
            .get("messages")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let text = format!("echo:{}", chat_text(&messages));
        if body.get("stream").and_then(|v| v.as_bool()) == Some(true) {
            let events = vec![
                Ok::<_, Infallible>(Event::default().data(
                    json!({ "id": "chatcmpl_up", "model": model, "choices": [{ "index": 0,
                        "delta": { "role": "assistant", "content": text }, "finish_reason": Value::Null }] })
                    .to_string(),
                )),
                Ok(Event::default().data(
                    json!({ "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }] })
                        .to_string(),
                )),
                Ok(Event::default().data("[DONE]")),
            ];
            return Sse::new(futures_util::stream::iter(events)).into_response();
        }
        Json(json!({
            "id": "chatcmpl_up",
            "object": "chat.completion",
            "created": 1715000000,
            "model": model,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12 }
        }))
        .into_response()
    }

    async fn messages(
        axum::extract::State(captured): axum::extract::State<Shared>,
        headers: axum::http::HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        capture_headers(&captured, &headers);
        let model = body.get("model").and_then(|v| v.as_str()).unwrap_or("mock");
        if let Some(resp) = forced_failure(&captured, model) {
            return resp;
        }
        captured
            .lock()
            .unwrap()
            .bodies
            .push(("messages".to_string(), body.clone()));
        Json(json!({
            "id": "msg_up",
            "type": "message",
            "role": "assistant",
            "model": model,
            "content": [{ "type": "text", "text": "4" }],
            "stop_reason": "end_turn",
            "stop_sequence": Value::Null,
            "usage": { "input_tokens": 12, "output_tokens": 1 }
        }))
        .into_response()
    }

    async fn gemini_generate(
        axum::extract::State(captured): axum::extract::State<Shared>,
        axum::extract::Path(model_action): axum::extract::Path<String>,
        headers: axum::http::HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        capture_headers(&captured, &headers);
        captured
            .lock()
            .unwrap()
            .bodies
            .push(("gemini".to_string(), body.clone()));
        if model_action.ends_with(":streamGenerateContent") {
            let events = vec![
                Ok::<_, Infallible>(Event::default().data(
                    json!({ "candidates": [{ "content": { "role": "model", "parts": [
                        { "functionCall": { "name": "get_weather" } }
                    ]}}]})
                    .to_string(),
                )),
                Ok(Event::default().data(
                    json!({ "candidates": [{ "content": { "role": "model", "parts": [
                        { "functionCall": { "name": "get_weather", "args": { "city": "Paris" } } }
                    ]}}]})
                    .to_string(),
                )),
                Ok(Event::default().data(
                    json!({ "candidates": [{ "content": { "role": "model", "parts": [] },
                        "finishReason": "STOP" }],
                        "usageMetadata": { "promptTokenCount": 9, "candidatesTokenCount": 5, "totalTokenCount": 14 } })
                    .to_string(),
                )),
            ];
            return Sse::new(futures_util::stream::iter(events)).into_response();
        }
        Json(json!({
            "candidates": [{
                "index": 0,
                "content": { "role": "model", "parts": [{ "text": "a cat" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 7, "candidatesTokenCount": 3, "totalTokenCount": 10 },
            "modelVersion": "gemini-1.5-pro"
        }))
        .into_response()
    }

    async fn list_models(
        axum::extract::State(captured): axum::extract::State<Shared>,
        headers: axum::http::HeaderMap,
    ) -> axum::response::Response {
        capture_headers(&captured, &headers);
        if headers.contains_key("x-goog-api-key") {
            return Json(json!({ "models": [
                { "name": "models/gemini-1.5-pro", "supportedGenerationMethods": ["generateContent"] },
                { "name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"] },
            ]}))
            .into_response();
        }
        Json(json!({ "object": "list", "data": [
            { "id": "gpt-4o", "object": "model", "created": 1715367049, "owned_by": "openai" },
        ]}))
        .into_response()
    }

    async fn list_models_anthropic(
        axum::extract::State(captured): axum::extract::State<Shared>,
        headers: axum::http::HeaderMap,
    ) -> axum::response::Response {
        capture_headers(&captured, &headers);
        Json(json!({ "data": [
            { "type": "model", "id": "claude-3-5-sonnet-20241022",
              "display_name": "Claude 3.5 Sonnet", "created_at": "2024-10-22T00:00:00Z" },
        ], "has_more": false }))
        .into_response()
    }

    let router = Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/v1/messages", post(messages))
        .route("/models/{model_action}", post(gemini_generate))
        .route("/models", get(list_models))
        .route("/v1/models", get(list_models_anthropic))
        .with_state(Arc::clone(&captured));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, captured)
}

fn test_runtime(database_url: String) -> trialect::app::RuntimeConfig {
    trialect::app::RuntimeConfig {
        listen: "127.0.0.1:0".to_string(),
        admin_password: "admin123".to_string(),
        encryption_key: Some("test-encryption-key".to_string()),
        database_url,
        anthropic_max_tokens: 32000,
        openai_reasoning_max_tokens: 32000,
        thinking: trialect::thinking::ThinkingConfig::default(),
    }
}

async fn seed_channel(
    state: &trialect::app::AppState,
    provider: Family,
    custom_key: &str,
    base_url: &str,
    mapping: &[(&str, &str)],
) -> trialect::channels::Channel {
    state
        .channels
        .add_channel(NewChannel {
            name: format!("{custom_key}-channel"),
            provider: Some(provider),
            base_url: base_url.to_string(),
            api_key: format!("upstream-secret-{custom_key}"),
            custom_key: custom_key.to_string(),
            timeout_secs: Some(10),
            max_retries: Some(3),
            proxy: None,
            models_mapping: mapping
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
        .await
        .expect("seed channel")
}

async fn setup() -> TestContext {
    let (upstream_addr, captured) = start_upstream().await;
    let base_url = format!("http://{upstream_addr}");

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("channels.db");
    let state = trialect::app::load_state_with_runtime(test_runtime(format!(
        "sqlite://{}",
        db_path.display()
    )))
    .await
    .expect("load state");

    seed_channel(&state, Family::Openai, "ck-openai", &base_url, &[]).await;
    seed_channel(
        &state,
        Family::Anthropic,
        "ck-anthropic",
        &base_url,
        &[("gpt-4o", "claude-3-5-sonnet-20241022")],
    )
    .await;
    seed_channel(&state, Family::Gemini, "ck-gemini", &base_url, &[]).await;

    let router = trialect::app::build_app(state.clone());
    TestContext {
        router,
        state,
        captured,
        _temp_dir: temp_dir,
    }
}

async fn send(ctx: &TestContext, request: Request<Body>) -> (StatusCode, String) {
    let resp = ctx.router.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

fn post_json(path: &str, auth: (&str, &str), body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(CONTENT_TYPE, "application/json")
        .header(auth.0, auth.1)
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// OpenAI-style ingress against an Anthropic-style channel, unary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_to_anthropic_unary_translates_both_ways() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/chat/completions",
            (AUTHORIZATION.as_str(), "Bearer ck-anthropic"),
            json!({
                "model": "gpt-4o",
                "messages": [
                    { "role": "system", "content": "Be terse." },
                    { "role": "user", "content": "2+2?" }
                ],
                "max_tokens": 16
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["object"], "chat.completion");
    assert_eq!(v["model"], "gpt-4o");
    assert_eq!(v["choices"][0]["message"]["content"], "4");
    assert_eq!(v["choices"][0]["finish_reason"], "stop");
    assert_eq!(v["usage"]["prompt_tokens"], 12);

    let upstream = ctx.upstream_bodies("messages");
    assert_eq!(upstream.len(), 1);
    let sent = &upstream[0];
    assert_eq!(sent["model"], "claude-3-5-sonnet-20241022");
    assert_eq!(sent["system"], "Be terse.");
    assert_eq!(sent["max_tokens"], 16);
    assert_eq!(sent["messages"][0]["role"], "user");
    assert_eq!(sent["messages"][0]["content"][0]["text"], "2+2?");
    assert_eq!(
        ctx.upstream_header("anthropic-version").as_deref(),
        Some("2023-06-01")
    );
    assert_eq!(
        ctx.upstream_header("x-api-key").as_deref(),
        Some("upstream-secret-ck-anthropic")
    );
}

// ---------------------------------------------------------------------------
// Anthropic-style ingress against a Gemini-style channel, streaming tool use
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anthropic_to_gemini_streaming_tool_use() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/messages",
            ("x-api-key", "ck-gemini"),
            json!({
                "model": "gemini-1.5-pro",
                "max_tokens": 256,
                "stream": true,
                "tools": [{
                    "name": "get_weather",
                    "description": "Get weather by city",
                    "input_schema": { "type": "object", "properties": { "city": { "type": "string" } } }
                }],
                "messages": [{ "role": "user", "content": "weather in paris?" }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.contains("event: message_start"));
    assert!(body.contains("\"type\":\"content_block_start\""));
    assert!(body.contains("\"name\":\"get_weather\""));
    assert!(body.contains("input_json_delta"));
    assert!(body.contains("\"stop_reason\":\"tool_use\""));
    assert!(body.contains("event: message_stop"));

    // Tool-argument fidelity: the concatenated partial_json parses to the
    // upstream object.
    let mut arguments = String::new();
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        let Ok(v) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        if v["type"] == "content_block_delta" && v["delta"]["type"] == "input_json_delta" {
            arguments.push_str(v["delta"]["partial_json"].as_str().unwrap());
        }
    }
    let parsed: Value = serde_json::from_str(&arguments).unwrap();
    assert_eq!(parsed, json!({ "city": "Paris" }));
}

// ---------------------------------------------------------------------------
// Gemini-style ingress against an OpenAI-style channel, vision
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gemini_to_openai_vision_becomes_data_url() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1beta/models/gemini-1.5-pro:generateContent?key=ck-openai",
            (CONTENT_TYPE.as_str(), "application/json"),
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": "what is in this image?" },
                        { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } }
                    ]
                }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["candidates"][0]["content"]["role"], "model");

    let upstream = ctx.upstream_bodies("chat");
    assert_eq!(upstream.len(), 1);
    let content = upstream[0]["messages"][0]["content"].as_array().unwrap();
    let image = content
        .iter()
        .find(|p| p["type"] == "image_url")
        .expect("image part");
    assert_eq!(
        image["image_url"]["url"],
        "data:image/png;base64,aGVsbG8="
    );
}

// ---------------------------------------------------------------------------
// Reasoning budget to effort mapping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anthropic_thinking_budget_maps_to_openai_effort() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/messages",
            ("x-api-key", "ck-openai"),
            json!({
                "model": "gpt-4o",
                "thinking": { "type": "enabled", "budget_tokens": 20000 },
                "messages": [{ "role": "user", "content": "think hard" }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let upstream = ctx.upstream_bodies("chat");
    let sent = &upstream[0];
    assert_eq!(sent["reasoning_effort"], "high");
    assert_eq!(sent["max_completion_tokens"], 32000);
    assert!(sent.get("max_tokens").is_none());
}

#[tokio::test]
async fn client_max_tokens_wins_over_reasoning_default() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/messages",
            ("x-api-key", "ck-openai"),
            json!({
                "model": "gpt-4o",
                "max_tokens": 64,
                "thinking": { "type": "enabled", "budget_tokens": 100 },
                "messages": [{ "role": "user", "content": "think a little" }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let upstream = ctx.upstream_bodies("chat");
    let sent = &upstream[0];
    assert_eq!(sent["reasoning_effort"], "low");
    assert_eq!(sent["max_completion_tokens"], 64);
}

#[tokio::test]
async fn anthropic_thinking_budget_without_max_tokens_uses_default() {
    let ctx = setup().await;
    // Gemini ingress has no required max_tokens, so the configured default
    // fills max_completion_tokens.
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1beta/models/gpt-4o:generateContent?key=ck-openai",
            (CONTENT_TYPE.as_str(), "application/json"),
            json!({
                "contents": [{ "role": "user", "parts": [{ "text": "think" }] }],
                "generationConfig": { "thinkingConfig": { "thinkingBudget": 1000 } }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let upstream = ctx.upstream_bodies("chat");
    let sent = &upstream[0];
    assert_eq!(sent["reasoning_effort"], "low");
    assert_eq!(sent["max_completion_tokens"], 32000);
}

// ---------------------------------------------------------------------------
// Retry on 503
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upstream_503_retries_until_success() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/chat/completions",
            (AUTHORIZATION.as_str(), "Bearer ck-openai"),
            json!({
                "model": "retry-twice",
                "messages": [{ "role": "user", "content": "hi" }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let attempts = ctx.captured.lock().unwrap().attempts.get("retry-twice").copied();
    assert_eq!(attempts, Some(3));
}

#[tokio::test]
async fn upstream_client_error_passes_through_without_retry() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/chat/completions",
            (AUTHORIZATION.as_str(), "Bearer ck-openai"),
            json!({
                "model": "always-400",
                "messages": [{ "role": "user", "content": "hi" }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["error"]["message"], "model is broken");
}

// ---------------------------------------------------------------------------
// Model-list reshaping across dialects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_list_from_gemini_channel_reshapes() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        Request::builder()
            .method("GET")
            .uri("/v1/models")
            .header(AUTHORIZATION, "Bearer ck-gemini")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["object"], "list");
    let data = v["data"].as_array().unwrap();
    assert_eq!(data.len(), 1, "embedding models are not generateContent");
    assert_eq!(data[0]["id"], "gemini-1.5-pro");
    assert_eq!(data[0]["object"], "model");
    assert_eq!(data[0]["owned_by"], "gemini");
}

#[tokio::test]
async fn anthropic_list_from_openai_channel_reshapes() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        Request::builder()
            .method("GET")
            .uri("/v1/models")
            .header("x-api-key", "ck-openai")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["data"][0]["type"], "model");
    assert_eq!(v["data"][0]["id"], "gpt-4o");
    assert_eq!(v["has_more"], false);
}

#[tokio::test]
async fn gemini_list_from_anthropic_channel_reshapes() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        Request::builder()
            .method("GET")
            .uri("/v1beta/models?key=ck-anthropic")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        v["models"][0]["name"],
        "models/claude-3-5-sonnet-20241022"
    );
}

// ---------------------------------------------------------------------------
// Auth and error envelopes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_key_is_401_in_family_envelope() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/chat/completions",
            (CONTENT_TYPE.as_str(), "application/json"),
            json!({ "model": "gpt-4o", "messages": [] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["error"]["type"], "authentication_error");

    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/messages",
            ("x-api-key", "no-such-key"),
            json!({ "model": "m", "max_tokens": 1, "messages": [] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["type"], "error");
    assert_eq!(v["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn gemini_error_envelope_carries_status_string() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1beta/models/gemini-1.5-pro:generateContent?key=bogus",
            (CONTENT_TYPE.as_str(), "application/json"),
            json!({ "contents": [{ "role": "user", "parts": [{ "text": "hi" }] }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["error"]["code"], 401);
    assert_eq!(v["error"]["status"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn disabled_channel_is_403() {
    let ctx = setup().await;
    let channel = ctx
        .state
        .channels
        .list_channels()
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.custom_key == "ck-openai")
        .unwrap();
    ctx.state
        .channels
        .update_channel(
            &channel.id,
            trialect::channels::ChannelUpdate {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/chat/completions",
            (AUTHORIZATION.as_str(), "Bearer ck-openai"),
            json!({ "model": "gpt-4o", "messages": [{ "role": "user", "content": "hi" }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}

#[tokio::test]
async fn invalid_request_reports_field_path() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/messages",
            ("x-api-key", "ck-anthropic"),
            json!({ "max_tokens": 16, "messages": [] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert!(v["error"]["message"].as_str().unwrap().contains("model"));
}

#[tokio::test]
async fn response_format_to_anthropic_channel_is_422() {
    let ctx = setup().await;
    let (status, _body) = send(
        &ctx,
        post_json(
            "/v1/chat/completions",
            (AUTHORIZATION.as_str(), "Bearer ck-anthropic"),
            json!({
                "model": "gpt-4o",
                "messages": [{ "role": "user", "content": "hi" }],
                "response_format": { "type": "json_object" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ---------------------------------------------------------------------------
// Same-family passthrough and streaming echo
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_to_openai_passthrough_unary() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/chat/completions",
            (AUTHORIZATION.as_str(), "Bearer ck-openai"),
            json!({
                "model": "gpt-4o",
                "messages": [{ "role": "user", "content": "ping" }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["choices"][0]["message"]["content"], "echo:ping");
}

#[tokio::test]
async fn openai_streaming_from_openai_channel() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1/chat/completions",
            (AUTHORIZATION.as_str(), "Bearer ck-openai"),
            json!({
                "model": "gpt-4o",
                "stream": true,
                "messages": [{ "role": "user", "content": "stream me" }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.contains("chat.completion.chunk"));
    assert!(body.contains("echo:stream me"));
    assert!(body.contains("\"finish_reason\":\"stop\""));
    assert!(body.trim_end().ends_with("data: [DONE]"));
    // The client-facing chunks carry the requested model name.
    assert!(body.contains("\"model\":\"gpt-4o\""));
}

#[tokio::test]
async fn gemini_streaming_from_openai_channel() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        post_json(
            "/v1beta/models/gpt-4o:streamGenerateContent?alt=sse&key=ck-openai",
            (CONTENT_TYPE.as_str(), "application/json"),
            json!({ "contents": [{ "role": "user", "parts": [{ "text": "go" }] }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.contains("\"candidates\""));
    assert!(body.contains("echo:go"));
    assert!(body.contains("\"finishReason\":\"STOP\""));
    // The stream path forces stream=true on the upstream call.
    let upstream = ctx.upstream_bodies("chat");
    assert_eq!(upstream[0]["stream"], true);
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let ctx = setup().await;
    let (status, body) = send(
        &ctx,
        Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("healthy"));
}
