use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use huddle_core::error::{ChatError, ErrorCode};

/// HTTP wrapper around the business error catalog. Renders
/// `{"code", "message"}` with the code's mapped status.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        Self(ChatError::new(code))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(serde_json::json!({
                "code": self.0.code.code(),
                "message": self.0.message,
            })),
        )
            .into_response()
    }
}
