use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Startup failures. These are fatal: the service must not accept traffic
/// without a loaded model.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("tokenizer load failed: {0}")]
    Tokenizer(String),
    #[error("model load failed: {0}")]
    Model(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-question failures inside the generation engine. Absorbed at the
/// facade into an error-text answer, never propagated to HTTP callers.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("model execution failed: {0}")]
    Inference(String),
    #[error("model resources have been released")]
    Released,
}

/// Errors the dispatcher surfaces to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("service is shutting down")]
    ShuttingDown,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
