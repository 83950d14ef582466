//! HTTP error mapping
//!
//! Engine error kinds map onto status codes; every error body carries
//! `{error, detail, request_id}` so clients and logs can correlate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use greenroom_core::CoreError;
use uuid::Uuid;

/// API-facing error wrapper
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

fn status_for(error: &CoreError) -> StatusCode {
    match error {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
        CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        CoreError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CoreError::ProviderUnavailable(_) | CoreError::CapacityExceeded(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(request_id, error = %self.0, "request failed");
        } else {
            tracing::debug!(request_id, error = %self.0, "request rejected");
        }
        let body = serde_json::json!({
            "error": self.0.kind(),
            "detail": self.0.to_string(),
            "requestId": request_id,
        });
        (status, Json(body)).into_response()
    }
}

/// Shorthand result for handlers
pub type ApiResult<T> = Result<T, ApiError>;
