use crate::channels::ChannelStore;
use crate::error::{AppError, AppResult};
use crate::thinking::ThinkingConfig;
use crate::upstream::ProxyClients;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::{Arc, Once, OnceLock};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub channels: ChannelStore,
    pub http: reqwest::Client,
    pub proxy_clients: ProxyClients,
    pub metrics: PrometheusHandle,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    /// Consumed by the admin collaborator, not by the proxy core.
    pub admin_password: String,
    pub encryption_key: Option<String>,
    pub database_url: String,
    pub anthropic_max_tokens: u64,
    pub openai_reasoning_max_tokens: u64,
    pub thinking: ThinkingConfig,
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_str(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let port = env_u64("WEB_PORT", 3000);
        Self {
            listen: format!("0.0.0.0:{port}"),
            admin_password: env_str("ADMIN_PASSWORD").unwrap_or_else(|| "admin123".to_string()),
            encryption_key: env_str("ENCRYPTION_KEY"),
            database_url: resolve_database_url(),
            anthropic_max_tokens: env_u64("ANTHROPIC_MAX_TOKENS", 32000),
            openai_reasoning_max_tokens: env_u64("OPENAI_REASONING_MAX_TOKENS", 32000),
            thinking: ThinkingConfig::from_env(),
        }
    }
}

fn resolve_database_url() -> String {
    match env_str("DATABASE_TYPE").as_deref() {
        Some("mysql") => {
            let host = env_str("MYSQL_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
            let port = env_u64("MYSQL_PORT", 3306);
            let user = env_str("MYSQL_USER").unwrap_or_else(|| "root".to_string());
            let password = env_str("MYSQL_PASSWORD").unwrap_or_default();
            let database = env_str("MYSQL_DATABASE").unwrap_or_else(|| "trialect".to_string());
            if password.is_empty() {
                format!("mysql://{user}@{host}:{port}/{database}")
            } else {
                format!("mysql://{user}:{password}@{host}:{port}/{database}")
            }
        }
        _ => {
            let path = env_str("DATABASE_PATH").unwrap_or_else(|| "data/channels.db".to_string());
            format!("sqlite://{path}")
        }
    }
}

pub async fn load_state() -> AppResult<AppState> {
    load_state_with_runtime(RuntimeConfig::from_env()).await
}

static DRIVERS_INIT: Once = Once::new();

pub async fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    DRIVERS_INIT.call_once(sqlx::any::install_default_drivers);
    ensure_sqlite_file(&runtime.database_url).map_err(|err| {
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "database_init_failed", err)
    })?;
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(5)
        .connect(&runtime.database_url)
        .await
        .map_err(|err| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_init_failed",
                err.to_string(),
            )
        })?;
    let channels = ChannelStore::new(pool, runtime.encryption_key.clone())
        .await
        .map_err(|err| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "channel_store_init_failed",
                err,
            )
        })?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("trialect/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "http_client_init_failed",
                err.to_string(),
            )
        })?;

    Ok(AppState {
        runtime: Arc::new(runtime),
        channels,
        http,
        proxy_clients: ProxyClients::default(),
        metrics: init_metrics()?,
    })
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "metrics_init_failed",
                    err.to_string(),
                ));
            }
        }
    });
    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE.get().cloned().ok_or_else(|| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics_init_failed",
            "metrics recorder not available",
        )
    })
}

fn ensure_sqlite_file(url: &str) -> Result<(), String> {
    let url = url.trim();
    let Some(path_part) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    if path_part.contains(":memory:") || path_part.contains("mode=memory") {
        return Ok(());
    }
    let path_part = path_part.split('?').next().unwrap_or("");
    if path_part.is_empty() {
        return Ok(());
    }
    let path = PathBuf::from(path_part);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| format!("sqlite_dir_create_failed: {err}"))?;
        }
    }
    if !path.exists() {
        std::fs::File::create(&path).map_err(|err| format!("sqlite_file_create_failed: {err}"))?;
    }
    Ok(())
}

pub fn build_app(state: AppState) -> Router {
    Router::<AppState>::new()
        .route(
            "/v1/chat/completions",
            post(crate::handlers::create_chat_completions),
        )
        .route("/v1/messages", post(crate::handlers::create_messages))
        .route(
            "/v1beta/models/{model_action}",
            post(crate::handlers::gemini_generate),
        )
        .route("/v1/models", get(crate::handlers::list_models))
        .route("/v1beta/models", get(crate::handlers::list_models_gemini))
        .route("/health", get(crate::handlers::health))
        .route("/metrics", get(crate::handlers::metrics))
        .with_state(state)
        .layer(SetRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
        ))
        .layer(TraceLayer::new_for_http())
}
