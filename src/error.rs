use crate::family::Family;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Error taxonomy of the proxy. The router is the only place these become
/// HTTP responses, rendered in the ingress family's envelope.
#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub param: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            param: None,
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    pub fn auth_missing() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "auth_missing", "Missing API key")
    }

    pub fn auth_unknown() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "auth_unknown", "Invalid API key")
    }

    pub fn channel_disabled() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "channel_disabled",
            "Channel is disabled",
        )
    }

    pub fn invalid_request(path: impl Into<String>, reason: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("{}: {}", path, reason.into()),
        )
        .with_param(path)
    }

    pub fn translation_unsupported(feature: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "translation_unsupported",
            format!("the target API cannot express: {}", feature.into()),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        tracing::error!("internal error: {}", message.into());
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error",
        )
    }

    /// Render into the error envelope the client's dialect expects.
    pub fn into_family_response(self, family: Family) -> Response {
        let status = self.status;
        let body = match family {
            Family::Openai => json!({
                "error": {
                    "message": self.message,
                    "type": openai_error_type(status),
                    "code": self.code,
                    "param": self.param,
                }
            }),
            Family::Anthropic => json!({
                "type": "error",
                "error": {
                    "type": anthropic_error_type(status),
                    "message": self.message,
                }
            }),
            Family::Gemini => json!({
                "error": {
                    "code": status.as_u16(),
                    "message": self.message,
                    "status": gemini_status(status),
                }
            }),
        };
        (status, axum::Json(body)).into_response()
    }
}

fn openai_error_type(status: StatusCode) -> &'static str {
    match status {
        StatusCode::UNAUTHORIZED => "authentication_error",
        StatusCode::FORBIDDEN => "permission_error",
        StatusCode::TOO_MANY_REQUESTS => "rate_limit_error",
        s if s.is_client_error() => "invalid_request_error",
        _ => "api_error",
    }
}

fn anthropic_error_type(status: StatusCode) -> &'static str {
    match status {
        StatusCode::UNAUTHORIZED => "authentication_error",
        StatusCode::FORBIDDEN => "permission_error",
        StatusCode::TOO_MANY_REQUESTS => "rate_limit_error",
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => "timeout_error",
        StatusCode::SERVICE_UNAVAILABLE => "overloaded_error",
        s if s.is_client_error() => "invalid_request_error",
        _ => "api_error",
    }
}

fn gemini_status(status: StatusCode) -> &'static str {
    match status {
        StatusCode::UNAUTHORIZED => "UNAUTHENTICATED",
        StatusCode::FORBIDDEN => "PERMISSION_DENIED",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::TOO_MANY_REQUESTS => "RESOURCE_EXHAUSTED",
        StatusCode::GATEWAY_TIMEOUT => "DEADLINE_EXCEEDED",
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => "UNAVAILABLE",
        s if s.is_client_error() => "INVALID_ARGUMENT",
        _ => "INTERNAL",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_family_response(Family::Openai)
    }
}

pub type AppResult<T> = Result<T, AppError>;
