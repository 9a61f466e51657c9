use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::TtsError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error(transparent)]
    Tts(#[from] TtsError),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Tts(e) => match e {
                TtsError::Validation(_) => StatusCode::BAD_REQUEST,
                TtsError::VoiceLoad { .. } => StatusCode::NOT_FOUND,
                TtsError::Export { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                TtsError::CapacityTimeout(_) | TtsError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
                TtsError::Synthesis { .. } | TtsError::Init(_) | TtsError::Worker(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Tts(e) => e.detail(),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, detail = ?detail, "request failed");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            detail,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
