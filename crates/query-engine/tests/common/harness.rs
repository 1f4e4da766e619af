//! Engine test harness.
//!
//! Wires an in-memory configuration store, an in-memory saved-query store and
//! a [`QueryExecutionService`] to a wiremock FHIR server.

use std::sync::Arc;
use std::time::Duration;

use helios_query_engine::{
    ClientOptions, FhirClient, FhirClientRegistry, FhirServerConfig, InMemorySavedQueryStore,
    InMemoryServerConfigStore, PatientRecordsRequest, QueryExecutionService, SavedQuery,
    ServerConfigStore, SmartKeyStore,
};
use serde_json::Value;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{PATIENT_ID, bundle};

/// Name of the configured server.
pub const SERVER_NAME: &str = "HELIOS";
/// Id of the configured server.
pub const SERVER_ID: &str = "server-1";

/// A running engine pointed at a mock FHIR server.
pub struct EngineHarness {
    pub fhir: MockServer,
    pub servers: Arc<InMemoryServerConfigStore>,
    pub queries: Arc<InMemorySavedQueryStore>,
    pub service: QueryExecutionService,
    _keys_dir: TempDir,
}

impl EngineHarness {
    /// Starts a mock FHIR server with an unauthenticated configuration.
    pub async fn start(queries: Vec<SavedQuery>) -> Self {
        Self::start_with(queries, |config| config).await
    }

    /// Starts a mock FHIR server; `configure` adjusts the server
    /// configuration before it is stored.
    pub async fn start_with(
        queries: Vec<SavedQuery>,
        configure: impl FnOnce(FhirServerConfig) -> FhirServerConfig,
    ) -> Self {
        let fhir = MockServer::start().await;
        let config = configure(FhirServerConfig::new(SERVER_ID, SERVER_NAME, fhir.uri()));
        Self::build(fhir, config, queries)
    }

    fn build(fhir: MockServer, config: FhirServerConfig, queries: Vec<SavedQuery>) -> Self {
        let keys_dir = TempDir::new().expect("Failed to create keys dir");
        let options = ClientOptions::default()
            .with_timeout(Duration::from_secs(10))
            .with_keys_dir(keys_dir.path());
        let keys = Arc::new(SmartKeyStore::new(&options.keys_dir, &options.jwks_url));

        let servers = Arc::new(InMemoryServerConfigStore::new(vec![config]));
        let queries = Arc::new(InMemorySavedQueryStore::new(queries));
        let store: Arc<dyn ServerConfigStore> = servers.clone();
        let registry = Arc::new(FhirClientRegistry::new(store, options, keys));
        let service = QueryExecutionService::new(registry, queries.clone());

        Self {
            fhir,
            servers,
            queries,
            service,
            _keys_dir: keys_dir,
        }
    }

    /// The stored configuration of the test server.
    pub fn stored_config(&self) -> FhirServerConfig {
        self.servers
            .find_by_id(SERVER_ID)
            .expect("test server configuration missing")
    }

    /// The shared client for the test server.
    pub async fn client(&self) -> Arc<FhirClient> {
        self.service
            .clients()
            .client(SERVER_NAME)
            .await
            .expect("test server client")
    }

    /// A records request for [`PATIENT_ID`] on the test server.
    pub fn records_request(&self, query_name: &str) -> PatientRecordsRequest {
        PatientRecordsRequest {
            fhir_server: SERVER_NAME.to_string(),
            patient_id: PATIENT_ID.to_string(),
            query_name: query_name.to_string(),
        }
    }

    /// Mounts a `_search` POST on `resource_type` whose form body contains
    /// `body_fragment`.
    pub async fn mock_search(&self, resource_type: &str, body_fragment: &str, resources: &[Value]) {
        Mock::given(method("POST"))
            .and(path(format!("/{resource_type}/_search")))
            .and(body_string_contains(body_fragment))
            .respond_with(ResponseTemplate::new(200).set_body_json(bundle(resources)))
            .mount(&self.fhir)
            .await;
    }

    /// Mounts an empty bundle for every POSTed search not matched otherwise.
    pub async fn mock_empty_searches(&self) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
            .with_priority(10)
            .mount(&self.fhir)
            .await;
    }
}
