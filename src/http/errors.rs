//! JSON error responses
//!
//! Every failure leaves the service as `{"detail": ..., "kind": ...}` with
//! the status fixed by the error kind.

use crate::error::ServiceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Wire format of an error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    pub kind: String,
}

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    detail: String,
}

/// HTTP status for each error kind
#[must_use]
pub fn status_for(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::InvalidInput(_)
        | ServiceError::InvalidImage(_)
        | ServiceError::UnsupportedModel(_) => StatusCode::BAD_REQUEST,
        ServiceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        ServiceError::ModelUnavailable(_) | ServiceError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::ModelInvocation(_)
        | ServiceError::Io(_)
        | ServiceError::Network(_)
        | ServiceError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    /// Prefix the detail, e.g. `Error processing image: <detail>`
    #[must_use]
    pub fn with_context(mut self, context: &str) -> Self {
        self.detail = format!("{context}: {}", self.detail);
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        Self {
            status: status_for(&error),
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail,
            kind: self.kind.to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}
