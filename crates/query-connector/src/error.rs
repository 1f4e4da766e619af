//! Error types for the connector's HTTP surface.
//!
//! Every error is rendered as a FHIR `OperationOutcome`.
//!
//! # Error Mapping
//!
//! | Engine Error Kind | HTTP Status | FHIR Issue Code |
//! |-------------------|-------------|-----------------|
//! | configuration | 400 | invalid |
//! | patient-not-found | 404 | not-found |
//! | authentication | 502 | security |
//! | transport | 502 | transient |
//! | upstream-http | 502 | processing |
//! | malformed-response | 502 | processing |
//! | store | 500 | exception |

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use helios_query_engine::{ErrorKind, QueryError};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, warn};

/// The error type returned by every handler.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request itself is unusable (HTTP 400).
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// An engine operation failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Anything else (HTTP 500).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Creates a bad-request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
        }
    }

    /// The HTTP status and FHIR issue code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "invalid"),
            ApiError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "exception"),
            ApiError::Query(err) => match err.kind() {
                ErrorKind::Configuration => (StatusCode::BAD_REQUEST, "invalid"),
                ErrorKind::PatientNotFound => (StatusCode::NOT_FOUND, "not-found"),
                ErrorKind::Authentication => (StatusCode::BAD_GATEWAY, "security"),
                ErrorKind::Transport => (StatusCode::BAD_GATEWAY, "transient"),
                ErrorKind::UpstreamHttp | ErrorKind::MalformedResponse => {
                    (StatusCode::BAD_GATEWAY, "processing")
                }
                ErrorKind::Store => (StatusCode::INTERNAL_SERVER_ERROR, "exception"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let diagnostics = self.to_string();

        if status.is_server_error() {
            error!(status = status.as_u16(), code, error = %diagnostics, "Request failed");
        } else {
            warn!(status = status.as_u16(), code, error = %diagnostics, "Request rejected");
        }

        (status, Json(operation_outcome("error", code, &diagnostics))).into_response()
    }
}

/// Creates a FHIR OperationOutcome with a single issue.
pub fn operation_outcome(severity: &str, code: &str, diagnostics: &str) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": severity,
            "code": code,
            "diagnostics": diagnostics,
        }]
    })
}
