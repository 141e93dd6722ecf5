//! Maps `CoreError` onto HTTP status codes (§7 "Propagation policy").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::CoreError;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CoreError::Cancelled => StatusCode::CONFLICT,
            CoreError::EngineFailure { .. }
            | CoreError::ProbeFailure(_)
            | CoreError::UpstreamFailure(_)
            | CoreError::Store(_)
            | CoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
