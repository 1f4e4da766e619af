//! FHIR server connection tests.

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::error::ApiResult;
use crate::state::AppState;

/// Handler for testing a configured FHIR server.
///
/// Authenticates if the server needs a token, probes it with a cheap search
/// and records the outcome on the server's configuration.
///
/// # HTTP Request
///
/// `POST [base]/api/fhir-servers/{name}/test-connection`
///
/// # Response
///
/// - `200 OK` - `{"success": bool, "error"?: string}`
/// - `400 Bad Request` - no server has that name
pub async fn test_connection_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    debug!(server = %name, "Testing FHIR server connection");
    let result = state.executor().test_connection(&name).await?;
    Ok(Json(result).into_response())
}
