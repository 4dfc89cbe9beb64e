use trialect::error::AppError;

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = std::env::var("LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| match v.to_lowercase().as_str() {
            // Python-style level name used by existing deployments.
            "warning" => "warn".to_string(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "warn,trialect=info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let log_file = std::env::var("LOG_FILE").ok().filter(|v| !v.trim().is_empty());
    match log_file {
        Some(log_file) => {
            let path = std::path::Path::new(&log_file);
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
            let prefix = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("app.log");
            let max_days = std::env::var("LOG_MAX_DAYS")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(1)
                .max(1);
            let appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix(prefix)
                .max_log_files(max_days)
                .build(directory.unwrap_or_else(|| std::path::Path::new(".")))
                .expect("log file appender");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let _guard = init_tracing();

    if let Err(err) = run().await {
        eprintln!("error: {}", err.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let state = trialect::app::load_state().await?;
    let app = trialect::app::build_app(state.clone());
    let addr: std::net::SocketAddr =
        state
            .runtime
            .listen
            .parse()
            .map_err(|err: std::net::AddrParseError| {
                AppError::new(
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "listen_invalid",
                    err.to_string(),
                )
            })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|err| {
        AppError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "listen_failed",
            err.to_string(),
        )
    })?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app).await.map_err(|err| {
        AppError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "serve_failed",
            err.to_string(),
        )
    })?;
    Ok(())
}
