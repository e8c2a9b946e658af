//! Maps [`ClavumError`] onto HTTP responses, mirroring the teacher's
//! `axum_rest_api.rs` example's `AuthError` wrapper.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use clavum_core::ClavumError;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

pub struct ApiError(pub ClavumError);

impl From<ClavumError> for ApiError {
    fn from(err: ClavumError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.is_retriable() {
            tracing::warn!(error = %self.0, "retriable error, caller may retry");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        let body = Json(ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}
