//! HTTP request handlers.
//!
//! - [`health`] - Liveness and health checks
//! - [`jwks`] - The SMART public key set
//! - [`query`] - Patient discovery, patient records and the combined query
//! - [`servers`] - FHIR server connection tests

pub mod health;
pub mod jwks;
pub mod query;
pub mod servers;

pub use health::{health_handler, liveness_handler};
pub use jwks::jwks_handler;
pub use query::{
    full_query_get_handler, full_query_post_handler, patient_discovery_handler,
    patient_records_handler,
};
pub use servers::test_connection_handler;
