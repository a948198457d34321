//! Mapping of core results onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use queuedesk_core::{DispatchError, Outcome, Rejection, StoreError};

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable `reason` (plus its fields) for rule rejections.
    #[serde(flatten)]
    pub rejection: Option<Rejection>,
}

/// Anything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    /// The request was valid but a queue rule refused it.
    Rejected(Rejection),
    Dispatch(DispatchError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Rejected(_) => StatusCode::CONFLICT,
            ApiError::Dispatch(err) => match err {
                DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
                DispatchError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
                DispatchError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
                err if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError::Dispatch(err)
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        ApiError::Rejected(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Rejected(rejection) => ErrorResponse {
                error: rejection.to_string(),
                rejection: Some(rejection),
            },
            ApiError::Dispatch(err) => {
                if status.is_server_error() {
                    error!(status = %status, error = %err, "Queue operation failed");
                }
                ErrorResponse {
                    error: err.to_string(),
                    rejection: None,
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Turn a rule rejection into a 409.
pub fn applied<T>(outcome: Outcome<T>) -> Result<T, ApiError> {
    match outcome {
        Outcome::Applied(value) => Ok(value),
        Outcome::Rejected(rejection) => Err(rejection.into()),
    }
}
