//! Shared HTTP error type for the REST handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dishcovery_upstream::UpstreamError;
use thiserror::Error;

pub const QUOTA_EXCEEDED_DETAIL: &str =
    "Gemini API quota exceeded. Try again in a minute or check your plan.";

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("{}", QUOTA_EXCEEDED_DETAIL)]
    QuotaExceeded,
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("upstream error: {0}")]
    BadGateway(String),
}

impl From<UpstreamError> for ApiError {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::QuotaExceeded => ApiError::QuotaExceeded,
            UpstreamError::UpstreamUnavailable(msg) => ApiError::Unavailable(msg),
            other => ApiError::BadGateway(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        };
        let detail = match self {
            ApiError::QuotaExceeded => QUOTA_EXCEEDED_DETAIL.to_string(),
            other => other.to_string(),
        };

        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
