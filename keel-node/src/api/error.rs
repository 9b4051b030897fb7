//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::{KillError, PublishError};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    StoreUnavailable(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::StoreUnavailable(msg) => {
                tracing::warn!("Store unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<KillError> for ApiError {
    fn from(err: KillError) -> Self {
        match err {
            KillError::InvalidPipelineId(_) => ApiError::BadRequest(err.to_string()),
            KillError::StoreUnavailable(_) => ApiError::StoreUnavailable(err.to_string()),
            KillError::Encode(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::NotFound(_) => ApiError::NotFound(err.to_string()),
            PublishError::Validation(msg) => ApiError::BadRequest(msg),
            PublishError::Store(ref source) if source.is_transient() => {
                ApiError::StoreUnavailable(err.to_string())
            }
            PublishError::Store(_) | PublishError::Encode(_) | PublishError::Decode { .. } => {
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use keel_store::StoreError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::from(KillError::InvalidPipelineId(String::new())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(KillError::StoreUnavailable(StoreError::unavailable("down"))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::from(PublishError::NotFound("a".to_string())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(PublishError::Store(StoreError::InvalidKey("k".to_string()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
