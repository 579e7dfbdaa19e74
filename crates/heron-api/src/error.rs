use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use heron_types::SocialError;
use thiserror::Error;
use tracing::error;

/// HTTP-facing wrapper for the domain error taxonomy; `?` converts
/// `SocialError` directly in handlers.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub SocialError);

impl ApiError {
    /// spawn_blocking join failures surface as the retryable 503.
    pub fn join(err: tokio::task::JoinError) -> Self {
        error!("spawn_blocking join error: {}", err);
        ApiError(SocialError::unavailable_msg("worker task failed"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SocialError::Validation(_) => StatusCode::BAD_REQUEST,
            SocialError::NotFound(_) => StatusCode::NOT_FOUND,
            SocialError::SelfAction => StatusCode::UNPROCESSABLE_ENTITY,
            SocialError::Conflict(_) => StatusCode::CONFLICT,
            SocialError::Permission(_) => StatusCode::FORBIDDEN,
            SocialError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
