use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use speech_core::SpeechError;
use thiserror::Error;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Another response is being spoken")]
    Busy,

    #[error("Speech error: {0}")]
    Speech(#[from] SpeechError),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Busy => StatusCode::CONFLICT,
            ApiError::Speech(SpeechError::InvalidState { .. }) => StatusCode::CONFLICT,
            ApiError::Speech(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::LlmError(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Speech(e) if status.is_server_error() => {
                tracing::error!(kind = e.kind(), "Speech error: {}", e)
            }
            ApiError::LlmError(msg) => tracing::error!("LLM error: {}", msg),
            ApiError::InternalError(msg) => tracing::error!("Internal error: {}", msg),
            _ => {}
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
