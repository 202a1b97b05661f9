use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Failure taxonomy for the whole request pipeline. Every variant carries a
/// user-safe message; raw provider bodies and transport errors are written to
/// the operational log at the point of failure and never reach a response.
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Permission(String),

    #[error("You have reached your daily limit of {limit} generations.")]
    RateLimit { limit: i64 },

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    Provider(String),

    #[error("Image generation services are temporarily busy. Please wait 30 seconds and try again.")]
    AllProvidersFailed,

    #[error("{0}")]
    Persistence(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error_message: String,
}

impl StudioError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StudioError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StudioError::Validation(_) => StatusCode::BAD_REQUEST,
            StudioError::Permission(_) => StatusCode::FORBIDDEN,
            StudioError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            StudioError::Transport(_) => StatusCode::BAD_GATEWAY,
            StudioError::Provider(_) => StatusCode::BAD_GATEWAY,
            StudioError::AllProvidersFailed => StatusCode::SERVICE_UNAVAILABLE,
            StudioError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StudioError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error_message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
