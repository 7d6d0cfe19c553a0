use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub mod evaluate;
pub mod health;
pub mod metrics;

/// Wire-level error: a machine-readable code plus a safe message.
/// Internal error text never reaches the client on 5xx paths.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unsupported audio format")]
    UnsupportedMedia,

    #[error("authentication required")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("evaluation failed")]
    EvaluationFailed,

    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedMedia => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::EvaluationFailed | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::UnsupportedMedia => "unsupported_media",
            ApiError::Unauthorized => "unauthorized",
            ApiError::NotFound => "not_found",
            ApiError::EvaluationFailed => "evaluation_failed",
            ApiError::Internal => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
