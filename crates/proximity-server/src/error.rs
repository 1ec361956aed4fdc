//! Maps `proximity_common::Error`'s tags to HTTP status codes and a
//! sanitized `{detail}` body. Upstream/Internal failures are logged at
//! error level with the full message; only a generic message crosses the
//! wire for those.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use proximity_common::Error;
use serde_json::json;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::ConflictStatus { .. } | Error::ConflictHostname(_) | Error::ConflictBusy(_) => {
                (StatusCode::CONFLICT, self.0.to_string())
            }
            Error::PoolExhausted(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.0.to_string()),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            Error::UpstreamTransient(_) | Error::UpstreamPermanent(_) | Error::PipelineRollback { .. } => {
                tracing::error!(error = %self.0, "upstream or pipeline failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "upstream operation failed".to_string())
            }
            Error::Encryption(_) | Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => {
                tracing::error!(error = %self.0, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
