//! One shared [`FhirClient`] per configured server.
//!
//! Sharing the client shares its token cache and refresh guard, so
//! concurrent requests to the same server reuse one token.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::auth::SmartKeyStore;
use crate::client::FhirClient;
use crate::config::ClientOptions;
use crate::error::QueryResult;
use crate::store::ServerConfigStore;

/// Builds clients on first use and keeps them until invalidated.
pub struct FhirClientRegistry {
    store: Arc<dyn ServerConfigStore>,
    options: ClientOptions,
    keys: Arc<SmartKeyStore>,
    clients: RwLock<HashMap<String, Arc<FhirClient>>>,
}

impl std::fmt::Debug for FhirClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhirClientRegistry")
            .field("options", &self.options)
            .field("clients", &self.clients.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FhirClientRegistry {
    pub fn new(
        store: Arc<dyn ServerConfigStore>,
        options: ClientOptions,
        keys: Arc<SmartKeyStore>,
    ) -> Self {
        Self {
            store,
            options,
            keys,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// The client for the server named `name`.
    pub async fn client(&self, name: &str) -> QueryResult<Arc<FhirClient>> {
        let cached = self.clients.read().get(name).cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let config = self.store.get_server(name).await?;
        let client = Arc::new(
            FhirClient::new(config, &self.options, Arc::clone(&self.keys))?
                .with_token_store(Arc::clone(&self.store)),
        );
        debug!(server = %name, "Prepared FHIR client");

        // A concurrent caller may have built one first; keep theirs.
        let mut clients = self.clients.write();
        Ok(Arc::clone(
            clients.entry(name.to_string()).or_insert(client),
        ))
    }

    /// Drops the cached client for `name`; the next request rebuilds it from
    /// the store.
    pub fn invalidate(&self, name: &str) {
        self.clients.write().remove(name);
    }

    pub fn invalidate_all(&self) {
        self.clients.write().clear();
    }

    pub fn store(&self) -> &Arc<dyn ServerConfigStore> {
        &self.store
    }

    pub fn keys(&self) -> &Arc<SmartKeyStore> {
        &self.keys
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }
}
