//! The SMART public key set.
//!
//! FHIR servers fetch this document (the `jku` of every client assertion) to
//! verify the connector's signatures. The key pair is generated on first
//! request if it does not exist yet.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `Cache-Control` sent with the JWKS.
pub const JWKS_CACHE_CONTROL: &str = "public, max-age=3600";

/// Handler for the JWKS endpoint.
///
/// # HTTP Request
///
/// `GET [base]/.well-known/jwks.json`
///
/// # Response
///
/// - `200 OK` - `{"keys": [...]}`, cacheable for an hour
/// - `500 Internal Server Error` - the key pair could not be loaded or generated
pub async fn jwks_handler(State(state): State<AppState>) -> ApiResult<Response> {
    debug!("Serving JWKS");
    let keys = Arc::clone(state.keys());

    let jwks = tokio::task::spawn_blocking(move || keys.jwks())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(|e| {
            error!(error = %e, "Error serving JWKS");
            ApiError::internal("Failed to load or generate JWKS")
        })?;

    Ok((
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, JWKS_CACHE_CONTROL),
            (header::CONTENT_TYPE, "application/json"),
        ],
        Json(jwks),
    )
        .into_response())
}
