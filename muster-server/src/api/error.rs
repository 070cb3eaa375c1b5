//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::StoreError;
use crate::service::DispatchError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Unavailable(String),
    Cancelled { job_id: u64 },
    JobFailed { job_id: u64, message: String },
    StoreError(StoreError),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, job_id) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            ApiError::Cancelled { job_id } => (
                StatusCode::REQUEST_TIMEOUT,
                format!("job {} was cancelled", job_id),
                Some(job_id),
            ),
            ApiError::JobFailed { job_id, message } => {
                (StatusCode::INTERNAL_SERVER_ERROR, message, Some(job_id))
            }
            ApiError::StoreError(err) => {
                tracing::error!("Store error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let body = match job_id {
            Some(job_id) => serde_json::json!({ "error": message, "job_id": job_id }),
            None => serde_json::json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::StoreError(err)
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::UnknownCommand(_) => ApiError::NotFound(message),
            DispatchError::Unauthorized { .. } => ApiError::Forbidden(message),
            DispatchError::NoWorkerAvailable(_) | DispatchError::WorkerBusy(_) => {
                ApiError::Unavailable(message)
            }
            DispatchError::Cancelled(job_id) => ApiError::Cancelled { job_id },
            DispatchError::Failed { job_id, message } | DispatchError::Errored { job_id, message } => {
                ApiError::JobFailed { job_id, message }
            }
            DispatchError::Store(err) => ApiError::StoreError(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
