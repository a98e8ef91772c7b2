//! Application error types and their HTTP mapping.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::Serialize;

/// Error model used throughout request parsing, decoding, and inference.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AudioDecode(String),
    #[error("{0}")]
    Inference(String),
    #[error("{0}")]
    BadMultipart(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Creates an error for uploads that cannot be decoded into audio samples.
    pub fn audio_decode(message: impl Into<String>) -> Self {
        Self::AudioDecode(message.into())
    }

    /// Creates an error for failures inside the acoustic model.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    /// Creates a multipart parsing/shape validation error.
    pub fn bad_multipart(message: impl Into<String>) -> Self {
        Self::BadMultipart(message.into())
    }

    /// Creates a `400 Bad Request` error for well-formed but unusable input.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates a startup configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a generic internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status reported for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadMultipart(_) | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AudioDecode(_)
            | AppError::Inference(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    success: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let payload = ErrorPayload {
            success: false,
            error: self.to_string(),
        };

        (status, Json(payload)).into_response()
    }
}
