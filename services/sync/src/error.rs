use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use waybill_common::error::WaybillError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Maps domain errors onto HTTP responses. Anything unexpected collapses
/// to a plain 500 so internals never leak to callers.
pub struct ApiError(pub WaybillError);

impl From<WaybillError> for ApiError {
    fn from(err: WaybillError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            WaybillError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            WaybillError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            WaybillError::RateLimited(m) => (StatusCode::TOO_MANY_REQUESTS, m.clone()),
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
