use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use spilka_core::MessagingError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps the messaging error taxonomy onto HTTP statuses. Internal failures
/// are logged in full and surfaced as an opaque 500.
pub struct ApiError(MessagingError);

impl From<MessagingError> for ApiError {
    fn from(err: MessagingError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(MessagingError::Internal(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            MessagingError::Unauthorized => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            MessagingError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            MessagingError::Forbidden(_) => (StatusCode::FORBIDDEN, self.0.to_string()),
            MessagingError::Validation(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            MessagingError::RateLimited { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, self.0.to_string())
            }
            MessagingError::Conflict(_) => (StatusCode::CONFLICT, self.0.to_string()),
            MessagingError::Internal(err) => {
                error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}
