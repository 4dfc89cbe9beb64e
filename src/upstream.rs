use crate::channels::Channel;
use crate::family::{ANTHROPIC_VERSION, Family};
use axum::http::StatusCode;
use metrics::counter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const BACKOFF_BASE_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Network,
    Timeout,
    Http,
}

#[derive(Debug, Clone)]
pub struct UpstreamCallError {
    pub kind: UpstreamErrorKind,
    pub status: Option<StatusCode>,
    pub message: String,
    pub body: Option<String>,
    pub retry_after: Option<Duration>,
}

impl UpstreamCallError {
    fn network(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Network,
            status: None,
            message: message.into(),
            body: None,
            retry_after: None,
        }
    }

    fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Timeout,
            status: None,
            message: message.into(),
            body: None,
            retry_after: None,
        }
    }

    fn http(status: StatusCode, body: String) -> Self {
        Self {
            kind: UpstreamErrorKind::Http,
            status: Some(status),
            message: format!("upstream status {status}"),
            body: Some(body),
            retry_after: None,
        }
    }

    fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn retryable(&self) -> bool {
        match self.kind {
            UpstreamErrorKind::Network => true,
            UpstreamErrorKind::Timeout => false,
            UpstreamErrorKind::Http => matches!(
                self.status,
                Some(StatusCode::TOO_MANY_REQUESTS)
                    | Some(StatusCode::INTERNAL_SERVER_ERROR)
                    | Some(StatusCode::BAD_GATEWAY)
                    | Some(StatusCode::SERVICE_UNAVAILABLE)
                    | Some(StatusCode::GATEWAY_TIMEOUT)
            ),
        }
    }
}

/// One pooled client per outbound proxy URL, shared process-wide; channels
/// without a proxy use the base client.
#[derive(Clone, Default)]
pub struct ProxyClients {
    clients: Arc<Mutex<HashMap<String, reqwest::Client>>>,
}

impl ProxyClients {
    pub async fn client_for(
        &self,
        base: &reqwest::Client,
        channel: &Channel,
    ) -> Result<reqwest::Client, UpstreamCallError> {
        let Some(proxy) = &channel.proxy else {
            return Ok(base.clone());
        };
        let url = proxy.url();
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&url) {
            return Ok(client.clone());
        }
        let proxy_cfg = reqwest::Proxy::all(&url)
            .map_err(|err| UpstreamCallError::network(format!("invalid proxy: {err}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("trialect/", env!("CARGO_PKG_VERSION")))
            .proxy(proxy_cfg)
            .build()
            .map_err(|err| UpstreamCallError::network(format!("proxy client init: {err}")))?;
        clients.insert(url, client.clone());
        Ok(client)
    }
}

/// Unary chat dispatch: total `channel.timeout_secs` budget across all
/// attempts, bounded retry on transient failures.
pub async fn call_chat(
    client: &reqwest::Client,
    channel: &Channel,
    model: &str,
    body: &Value,
) -> Result<Value, UpstreamCallError> {
    let path = channel.provider.chat_path(model, false);
    let deadline = Instant::now() + Duration::from_secs(channel.timeout_secs);
    let mut last_err: Option<UpstreamCallError> = None;

    for attempt in 0..=channel.max_retries {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
        else {
            return Err(last_err
                .unwrap_or_else(|| UpstreamCallError::timeout("upstream timeout exhausted")));
        };
        counter!("trialect_upstream_requests_total", "provider" => channel.provider.as_str())
            .increment(1);
        let request = build_post(client, channel, &path, body).timeout(remaining);
        let result = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let text = response.text().await.map_err(|err| {
                        UpstreamCallError::network(format!("upstream body read: {err}"))
                    })?;
                    return serde_json::from_str(&text).map_err(|err| {
                        UpstreamCallError::network(format!("upstream returned invalid JSON: {err}"))
                    });
                }
                let retry_after = parse_retry_after(response.headers());
                let body_text = response.text().await.unwrap_or_default();
                Err(UpstreamCallError::http(status, body_text).with_retry_after(retry_after))
            }
            Err(err) if err.is_timeout() => Err(UpstreamCallError::timeout(scrub(&err))),
            Err(err) => Err(UpstreamCallError::network(scrub(&err))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.retryable() || attempt == channel.max_retries {
                    return Err(err);
                }
                counter!("trialect_upstream_retries_total", "provider" => channel.provider.as_str())
                    .increment(1);
                tracing::warn!(
                    channel = %channel.id,
                    attempt,
                    error = %err.message,
                    "retrying upstream call"
                );
                let pause = retry_pause(&err, attempt, deadline);
                if pause.is_zero() {
                    return Err(err);
                }
                tokio::time::sleep(pause).await;
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| UpstreamCallError::timeout("upstream retries exhausted")))
}

/// Streaming chat dispatch: `channel.timeout_secs` bounds time to response
/// headers only; once bytes flow, no retry and no timeout.
pub async fn call_chat_stream(
    client: &reqwest::Client,
    channel: &Channel,
    model: &str,
    body: &Value,
) -> Result<reqwest::Response, UpstreamCallError> {
    let path = channel.provider.chat_path(model, true);
    let deadline = Instant::now() + Duration::from_secs(channel.timeout_secs);
    let mut last_err: Option<UpstreamCallError> = None;

    for attempt in 0..=channel.max_retries {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
        else {
            return Err(last_err
                .unwrap_or_else(|| UpstreamCallError::timeout("upstream timeout exhausted")));
        };
        counter!("trialect_upstream_requests_total", "provider" => channel.provider.as_str())
            .increment(1);
        let request = build_post(client, channel, &path, body);
        let result = match tokio::time::timeout(remaining, request.send()).await {
            Err(_) => Err(UpstreamCallError::timeout("upstream connect timeout")),
            Ok(Err(err)) => Err(UpstreamCallError::network(scrub(&err))),
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let retry_after = parse_retry_after(response.headers());
                let body_text = response.text().await.unwrap_or_default();
                Err(UpstreamCallError::http(status, body_text).with_retry_after(retry_after))
            }
        };

        match result {
            Ok(response) => return Ok(response),
            Err(err) => {
                if !err.retryable() || attempt == channel.max_retries {
                    return Err(err);
                }
                counter!("trialect_upstream_retries_total", "provider" => channel.provider.as_str())
                    .increment(1);
                let pause = retry_pause(&err, attempt, deadline);
                if pause.is_zero() {
                    return Err(err);
                }
                tokio::time::sleep(pause).await;
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| UpstreamCallError::timeout("upstream retries exhausted")))
}

/// Model-listing fetch for the aggregator.
pub async fn call_list_models(
    client: &reqwest::Client,
    channel: &Channel,
) -> Result<Value, UpstreamCallError> {
    let url = join_url(&channel.base_url, channel.provider.list_models_path());
    let request = apply_auth(
        client
            .get(url)
            .timeout(Duration::from_secs(channel.timeout_secs)),
        channel.provider,
        &channel.api_key,
    );
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => return Err(UpstreamCallError::timeout(scrub(&err))),
        Err(err) => return Err(UpstreamCallError::network(scrub(&err))),
    };
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|err| UpstreamCallError::network(format!("upstream body read: {err}")))?;
    if !status.is_success() {
        return Err(UpstreamCallError::http(status, text));
    }
    serde_json::from_str(&text)
        .map_err(|err| UpstreamCallError::network(format!("upstream returned invalid JSON: {err}")))
}

fn build_post<'a>(
    client: &'a reqwest::Client,
    channel: &Channel,
    path: &str,
    body: &Value,
) -> reqwest::RequestBuilder {
    let url = join_url(&channel.base_url, path);
    apply_auth(client.post(url).json(body), channel.provider, &channel.api_key)
}

fn apply_auth(
    request: reqwest::RequestBuilder,
    family: Family,
    credential: &str,
) -> reqwest::RequestBuilder {
    match family {
        Family::Openai => request.bearer_auth(credential),
        Family::Anthropic => request
            .header("x-api-key", credential)
            .header("anthropic-version", ANTHROPIC_VERSION),
        Family::Gemini => request.header("x-goog-api-key", credential),
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    if base.ends_with("/v1") {
        if let Some(stripped) = path.strip_prefix("v1/") {
            path = stripped;
        }
    }
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

/// A 429 Retry-After shorter than the remaining budget wins over backoff.
fn retry_pause(err: &UpstreamCallError, attempt: u32, deadline: Instant) -> Duration {
    if let Some(retry_after) = err.retry_after {
        if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            if retry_after < remaining {
                return retry_after;
            }
        }
        return Duration::ZERO;
    }
    backoff_delay(attempt, deadline)
}

fn parse_retry_after(headers: &axum::http::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Exponential backoff with jitter, capped by the remaining budget. Jitter
/// seeds from a fresh uuid so no RNG state is carried.
fn backoff_delay(attempt: u32, deadline: Instant) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(1 << attempt.min(6));
    let jitter = (uuid::Uuid::new_v4().as_u128() as u64) % (base / 2 + 1);
    let pause = Duration::from_millis(base + jitter);
    match deadline.checked_duration_since(Instant::now()) {
        Some(remaining) => pause.min(remaining),
        None => Duration::ZERO,
    }
}

/// reqwest errors carry the full URL, which for Gemini-style upstreams can
/// include credentials in query form. Strip to the error kind.
fn scrub(err: &reqwest::Error) -> String {
    let mut err_ref: &dyn std::error::Error = err;
    let mut last = err.to_string();
    while let Some(source) = err_ref.source() {
        last = source.to_string();
        err_ref = source;
    }
    if err.is_connect() {
        format!("connection failed: {last}")
    } else if err.is_timeout() {
        "request timed out".to_string()
    } else {
        last
    }
}
