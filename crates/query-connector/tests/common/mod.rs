//! Common test utilities for connector API testing.
//!
//! Builds an [`AppState`] over in-memory stores with one FHIR server pointed
//! at a wiremock instance, and wraps the router in an axum-test
//! [`TestServer`].

#![allow(dead_code)]

use std::sync::Arc;

use axum_test::TestServer;
use helios_query_connector::{AppState, ServerConfig, create_app};
use helios_query_engine::{
    Concept, ConceptType, FhirServerConfig, InMemorySavedQueryStore, InMemoryServerConfigStore,
    NestedQuery, SavedQuery, ValueSet,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::MockServer;

/// Name of the configured FHIR server.
pub const SERVER_NAME: &str = "HELIOS";
/// Name of the saved query.
pub const QUERY_NAME: &str = "Chlamydia case investigation";
/// Lab code selected in the saved query.
pub const LAB_CODE: &str = "24111-7";

/// A connector wired to a mock FHIR server.
pub struct ApiHarness {
    pub server: TestServer,
    pub fhir: MockServer,
    _keys_dir: TempDir,
}

impl ApiHarness {
    /// Starts a harness with an unauthenticated FHIR server.
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    /// Starts a harness; `configure` adjusts the server configuration.
    pub async fn start_with(configure: impl FnOnce(FhirServerConfig) -> FhirServerConfig) -> Self {
        let fhir = MockServer::start().await;
        let keys_dir = TempDir::new().expect("Failed to create keys dir");

        let servers = InMemoryServerConfigStore::new(vec![configure(FhirServerConfig::new(
            "server-1",
            SERVER_NAME,
            fhir.uri(),
        ))]);
        let queries = InMemorySavedQueryStore::new(vec![saved_query()]);
        let config = ServerConfig {
            keys_dir: keys_dir.path().to_path_buf(),
            app_hostname: Some("https://qc.example.org".to_string()),
            ..ServerConfig::for_testing()
        };

        let state = AppState::new(Arc::new(servers), Arc::new(queries), config);
        let server = TestServer::new(create_app(state)).expect("Failed to create test server");

        Self {
            server,
            fhir,
            _keys_dir: keys_dir,
        }
    }
}

/// A saved query selecting one lab code.
pub fn saved_query() -> SavedQuery {
    let mut query_data = NestedQuery::new();
    query_data.entry("chlamydia".to_string()).or_default().insert(
        "labs-vs".to_string(),
        ValueSet::new("labs-vs", ConceptType::Labs)
            .with_concept(Concept::new(LAB_CODE, "Chlamydia trachomatis rRNA")),
    );
    SavedQuery {
        query_id: "q-1".to_string(),
        query_name: QUERY_NAME.to_string(),
        query_data,
        immunization: false,
    }
}

/// A search-set bundle holding `resources`.
pub fn bundle(resources: &[Value]) -> Value {
    let entries: Vec<Value> = resources
        .iter()
        .map(|resource| json!({ "resource": resource }))
        .collect();
    json!({ "resourceType": "Bundle", "type": "searchset", "entry": entries })
}

/// A minimal resource.
pub fn resource(resource_type: &str, id: &str) -> Value {
    json!({ "resourceType": resource_type, "id": id })
}
