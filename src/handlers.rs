use crate::app::AppState;
use crate::channels::{Channel, ResolveError};
use crate::error::{AppError, AppResult};
use crate::family::Family;
use crate::upstream::{self, UpstreamCallError, UpstreamErrorKind};
use crate::wire;
use crate::wire::encode::EgressOptions;
use crate::wire::stream::{Decoder, Encoder};
use crate::wire::ChatRequest;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use metrics::counter;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

pub async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Chat ingress
// ---------------------------------------------------------------------------

pub async fn create_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::Json<Value>,
) -> Response {
    let custom_key = bearer_token(&headers);
    handle_chat(state, Family::Openai, custom_key, body.0, None, false).await
}

pub async fn create_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::Json<Value>,
) -> Response {
    let custom_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    handle_chat(state, Family::Anthropic, custom_key, body.0, None, false).await
}

pub async fn gemini_generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: axum::Json<Value>,
) -> Response {
    let custom_key = gemini_key(&headers, &query);
    let (model, action) = match model_action.rsplit_once(':') {
        Some((model, action)) => (model.to_string(), action.to_string()),
        None => (model_action, String::new()),
    };
    let force_stream = match action.as_str() {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return AppError::new(
                StatusCode::NOT_FOUND,
                "unknown_operation",
                format!("unsupported operation '{other}'"),
            )
            .into_family_response(Family::Gemini);
        }
    };
    handle_chat(
        state,
        Family::Gemini,
        custom_key,
        body.0,
        Some(model),
        force_stream,
    )
    .await
}

async fn handle_chat(
    state: AppState,
    ingress: Family,
    custom_key: Option<String>,
    body: Value,
    path_model: Option<String>,
    force_stream: bool,
) -> Response {
    counter!("trialect_requests_total", "family" => ingress.as_str(), "operation" => "chat")
        .increment(1);
    match chat_pipeline(state, ingress, custom_key, body, path_model, force_stream).await {
        Ok(response) => response,
        Err(err) => err.into_family_response(ingress),
    }
}

async fn chat_pipeline(
    state: AppState,
    ingress: Family,
    custom_key: Option<String>,
    body: Value,
    path_model: Option<String>,
    force_stream: bool,
) -> AppResult<Response> {
    let custom_key = custom_key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(AppError::auth_missing)?;
    let channel = resolve_channel(&state, &custom_key).await?;

    let request = decode_ingress(ingress, &body, path_model.as_deref(), force_stream)?;
    check_translatable(&request, &channel)?;

    let logical_model = request.model.clone();
    let upstream_model = channel.upstream_model(&logical_model);
    let egress = EgressOptions {
        source: ingress,
        thinking: &state.runtime.thinking,
        anthropic_max_tokens: state.runtime.anthropic_max_tokens,
        openai_reasoning_max_tokens: state.runtime.openai_reasoning_max_tokens,
    };
    let upstream_body = encode_egress(&request, &channel, &upstream_model, &egress);
    let client = state
        .proxy_clients
        .client_for(&state.http, &channel)
        .await
        .map_err(upstream_error_to_app)?;

    tracing::debug!(
        channel = %channel.id,
        ingress = %ingress,
        provider = %channel.provider,
        model = %upstream_model,
        stream = request.stream,
        "forwarding chat request"
    );

    if request.stream {
        let upstream_resp = upstream::call_chat_stream(&client, &channel, &upstream_model, &upstream_body)
            .await
            .map_err(upstream_error_to_app)?;
        Ok(stream_response(upstream_resp, channel.provider, ingress, logical_model))
    } else {
        let value = upstream::call_chat(&client, &channel, &upstream_model, &upstream_body)
            .await
            .map_err(upstream_error_to_app)?;
        let mut response = decode_upstream_response(channel.provider, &value)?;
        response.model = logical_model.clone();
        let client_body = encode_client_response(ingress, &response, &logical_model);
        Ok(axum::Json(client_body).into_response())
    }
}

fn decode_ingress(
    ingress: Family,
    body: &Value,
    path_model: Option<&str>,
    force_stream: bool,
) -> AppResult<ChatRequest> {
    let decoded = match ingress {
        Family::Openai => wire::decode::openai::decode_request(body),
        Family::Anthropic => wire::decode::anthropic::decode_request(body),
        Family::Gemini => wire::decode::gemini::decode_request(
            body,
            path_model.unwrap_or_default(),
            force_stream,
        ),
    };
    decoded.map_err(|err| AppError::invalid_request(err.path, err.reason))
}

/// A requested feature the target family has no wire form for is a 422, not
/// a silent drop.
fn check_translatable(request: &ChatRequest, channel: &Channel) -> AppResult<()> {
    if channel.provider == Family::Anthropic && request.response_format.is_some() {
        return Err(AppError::translation_unsupported(
            "structured response_format on an anthropic-family channel",
        ));
    }
    Ok(())
}

fn encode_egress(
    request: &ChatRequest,
    channel: &Channel,
    upstream_model: &str,
    egress: &EgressOptions,
) -> Value {
    match channel.provider {
        Family::Openai => wire::encode::openai::encode_request(request, upstream_model, egress),
        Family::Anthropic => {
            wire::encode::anthropic::encode_request(request, upstream_model, egress)
        }
        Family::Gemini => wire::encode::gemini::encode_request(request, egress),
    }
}

fn decode_upstream_response(provider: Family, value: &Value) -> AppResult<wire::ChatResponse> {
    let decoded = match provider {
        Family::Openai => wire::decode::openai::decode_response(value),
        Family::Anthropic => wire::decode::anthropic::decode_response(value),
        Family::Gemini => wire::decode::gemini::decode_response(value),
    };
    decoded.map_err(|err| {
        AppError::new(
            StatusCode::BAD_GATEWAY,
            "upstream_shape",
            format!("unexpected upstream response: {err}"),
        )
    })
}

fn encode_client_response(
    ingress: Family,
    response: &wire::ChatResponse,
    client_model: &str,
) -> Value {
    match ingress {
        Family::Openai => wire::encode::openai::encode_response(response, client_model),
        Family::Anthropic => wire::encode::anthropic::encode_response(response, client_model),
        Family::Gemini => wire::encode::gemini::encode_response(response, client_model),
    }
}

// ---------------------------------------------------------------------------
// Streaming bridge
// ---------------------------------------------------------------------------

/// Pump upstream SSE through decoder and encoder into the client stream.
/// Dropping the receiver (client disconnect) makes the send fail, which
/// drops the upstream response body and closes the outbound connection.
fn stream_response(
    upstream_resp: reqwest::Response,
    provider: Family,
    ingress: Family,
    client_model: String,
) -> Response {
    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(async move {
        let mut decoder = Decoder::for_family(provider);
        let mut encoder = Encoder::for_family(ingress, &client_model);
        let mut upstream = upstream_resp.bytes_stream().eventsource();
        let mut failed = false;

        while let Some(frame) = upstream.next().await {
            match frame {
                Ok(frame) => {
                    for event in decoder.feed(&frame.data) {
                        if !send_encoded(&tx, &mut encoder, &event).await {
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!("upstream stream error: {err}");
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            for frame in encoder.error_frames("upstream_error", "upstream connection lost") {
                if tx.send(frame_to_event(frame)).await.is_err() {
                    return;
                }
            }
        }
        // Close every open block and terminate the message whether the
        // upstream ended cleanly or not.
        for event in decoder.finish() {
            if !send_encoded(&tx, &mut encoder, &event).await {
                return;
            }
        }
    });

    let mut response =
        Sse::new(ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>)).into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        axum::http::HeaderValue::from_static("no-cache"),
    );
    response
}

async fn send_encoded(
    tx: &mpsc::Sender<Event>,
    encoder: &mut Encoder,
    event: &wire::StreamEvent,
) -> bool {
    for frame in encoder.encode(event) {
        if tx.send(frame_to_event(frame)).await.is_err() {
            return false;
        }
    }
    true
}

fn frame_to_event(frame: crate::wire::stream::SseFrame) -> Event {
    let event = Event::default().data(frame.data);
    match frame.event {
        Some(name) => event.event(name),
        None => event,
    }
}

// ---------------------------------------------------------------------------
// Model listing
// ---------------------------------------------------------------------------

/// `GET /v1/models` serves both the bearer (OpenAI-style) and x-api-key
/// (Anthropic-style) dialects; the auth header picks the output shape.
pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (ingress, custom_key) = if let Some(token) = bearer_token(&headers) {
        (Family::Openai, Some(token))
    } else if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        (Family::Anthropic, Some(key.to_string()))
    } else {
        return AppError::auth_missing().into_family_response(Family::Openai);
    };
    list_models_for(state, ingress, custom_key).await
}

pub async fn list_models_gemini(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let custom_key = gemini_key(&headers, &query);
    list_models_for(state, Family::Gemini, custom_key).await
}

async fn list_models_for(
    state: AppState,
    ingress: Family,
    custom_key: Option<String>,
) -> Response {
    counter!("trialect_requests_total", "family" => ingress.as_str(), "operation" => "list_models")
        .increment(1);
    let result: AppResult<Value> = async {
        let custom_key = custom_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(AppError::auth_missing)?;
        let channel = resolve_channel(&state, &custom_key).await?;
        let client = state
            .proxy_clients
            .client_for(&state.http, &channel)
            .await
            .map_err(upstream_error_to_app)?;
        crate::model_list::list_models_for_channel(&client, &channel, ingress)
            .await
            .map_err(upstream_error_to_app)
    }
    .await;
    match result {
        Ok(body) => axum::Json(body).into_response(),
        Err(err) => err.into_family_response(ingress),
    }
}

// ---------------------------------------------------------------------------
// Auth extraction and shared plumbing
// ---------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// The Gemini dialect accepts the key as `?key=`, as `x-goog-api-key`, or
/// (lowest priority) as a bearer header.
fn gemini_key(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    query
        .get("key")
        .cloned()
        .or_else(|| {
            headers
                .get("x-goog-api-key")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .or_else(|| bearer_token(headers))
}

async fn resolve_channel(state: &AppState, custom_key: &str) -> AppResult<Channel> {
    match state.channels.resolve_by_custom_key(custom_key).await {
        Ok(channel) => Ok(channel),
        Err(ResolveError::NotFound) => Err(AppError::auth_unknown()),
        Err(ResolveError::Disabled) => Err(AppError::channel_disabled()),
        Err(ResolveError::Store(err)) => Err(AppError::internal(err)),
    }
}

fn upstream_error_to_app(err: UpstreamCallError) -> AppError {
    match err.kind {
        UpstreamErrorKind::Timeout => AppError::new(
            StatusCode::GATEWAY_TIMEOUT,
            "upstream_timeout",
            "upstream request timed out",
        ),
        UpstreamErrorKind::Network => AppError::new(
            StatusCode::GATEWAY_TIMEOUT,
            "upstream_network",
            format!("upstream unreachable: {}", err.message),
        ),
        UpstreamErrorKind::Http => {
            let status = err.status.unwrap_or(StatusCode::BAD_GATEWAY);
            let message = err
                .body
                .as_deref()
                .and_then(extract_upstream_message)
                .unwrap_or_else(|| err.message.clone());
            AppError::new(status, "upstream_error", message)
        }
    }
}

/// Pull the human-readable message out of whichever error envelope the
/// upstream spoke.
fn extract_upstream_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
