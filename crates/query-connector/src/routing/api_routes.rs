//! Connector route configuration.

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers;
use crate::state::AppState;

/// Creates every connector route.
///
/// # Routes
///
/// ## Operational
/// - `GET /health` - Health check
/// - `GET /_liveness` - Liveness probe
/// - `GET /.well-known/jwks.json` - SMART public key set
///
/// ## Queries
/// - `POST /api/patient-discovery` - Find patients by demographics
/// - `POST /api/patient-records` - Run a saved query for a patient
/// - `GET /api/query` - Discovery and records in one call (query string)
/// - `POST /api/query` - Discovery and records in one call (JSON body)
///
/// ## Servers
/// - `POST /api/fhir-servers/{name}/test-connection` - Connection test
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/_liveness", get(handlers::liveness_handler))
        .route("/.well-known/jwks.json", get(handlers::jwks_handler))
        .route(
            "/api/patient-discovery",
            post(handlers::patient_discovery_handler),
        )
        .route(
            "/api/patient-records",
            post(handlers::patient_records_handler),
        )
        .route(
            "/api/query",
            get(handlers::full_query_get_handler).post(handlers::full_query_post_handler),
        )
        .route(
            "/api/fhir-servers/{name}/test-connection",
            post(handlers::test_connection_handler),
        )
        .with_state(state)
}
