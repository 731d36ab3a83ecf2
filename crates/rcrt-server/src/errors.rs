//! Maps the shared `RcrtError` taxonomy onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rcrt_core::error::RcrtError;
use serde_json::json;

pub struct ApiError(pub RcrtError);

impl From<RcrtError> for ApiError {
    fn from(e: RcrtError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            RcrtError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RcrtError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            RcrtError::VersionConflict => (StatusCode::PRECONDITION_FAILED, "version_conflict"),
            RcrtError::PreconditionRequired => {
                (StatusCode::PRECONDITION_REQUIRED, "precondition_required")
            }
            RcrtError::IdempotencyConflict => (StatusCode::CONFLICT, "idempotency_conflict"),
            RcrtError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            RcrtError::Db(e) => {
                tracing::error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            RcrtError::Other(e) => {
                tracing::error!(error = %e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let body = Json(json!({
            "error": code,
            "message": self.0.to_string(),
        }));

        (status, body).into_response()
    }
}

pub fn internal_error<E: std::fmt::Display>(e: E) -> ApiError {
    ApiError(RcrtError::Other(anyhow::anyhow!("{e}")))
}
