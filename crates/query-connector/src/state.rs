//! Application state shared by every handler.

use std::sync::Arc;

use helios_query_engine::{
    AuditedQueryService, CachedServerConfigStore, FhirClientRegistry, InMemorySavedQueryStore,
    InMemoryServerConfigStore, QueryExecutionService, QueryResult, QueryService, SavedQueryStore,
    ServerConfigStore, SmartKeyStore, TracingAuditSink,
};
use tracing::info;

use crate::config::ServerConfig;

/// Shared application state.
///
/// Cloning is cheap: every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Audited entry points used by the query routes.
    queries: Arc<dyn QueryService>,
    executor: QueryExecutionService,
    keys: Arc<SmartKeyStore>,
    config: Arc<ServerConfig>,
}

impl AppState {
    /// Creates state around already-built stores.
    pub fn new(
        servers: Arc<dyn ServerConfigStore>,
        saved_queries: Arc<dyn SavedQueryStore>,
        config: ServerConfig,
    ) -> Self {
        let options = config.client_options();
        let keys = Arc::new(SmartKeyStore::new(&options.keys_dir, &options.jwks_url));
        let registry = Arc::new(FhirClientRegistry::new(servers, options, Arc::clone(&keys)));
        let executor = QueryExecutionService::new(registry, saved_queries);
        let queries = Arc::new(AuditedQueryService::new(executor.clone(), TracingAuditSink));

        Self {
            queries,
            executor,
            keys,
            config: Arc::new(config),
        }
    }

    /// Creates state from the JSON files named in `config`.
    ///
    /// A missing file setting yields an empty store.
    pub fn from_config(config: ServerConfig) -> QueryResult<Self> {
        let servers = match &config.fhir_servers_file {
            Some(path) => InMemoryServerConfigStore::from_json_file(path)?,
            None => InMemoryServerConfigStore::default(),
        };
        let saved_queries = match &config.saved_queries_file {
            Some(path) => InMemorySavedQueryStore::from_json_file(path)?,
            None => InMemorySavedQueryStore::default(),
        };
        info!(
            servers_file = ?config.fhir_servers_file,
            queries_file = ?config.saved_queries_file,
            "Loaded connector stores"
        );

        Ok(Self::new(
            Arc::new(CachedServerConfigStore::new(servers)),
            Arc::new(saved_queries),
            config,
        ))
    }

    /// The audited query entry points.
    pub fn queries(&self) -> &dyn QueryService {
        self.queries.as_ref()
    }

    /// The unaudited executor, for operations outside [`QueryService`].
    pub fn executor(&self) -> &QueryExecutionService {
        &self.executor
    }

    /// The SMART signing key store.
    pub fn keys(&self) -> &Arc<SmartKeyStore> {
        &self.keys
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
