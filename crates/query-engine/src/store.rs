//! Contracts for the external configuration and saved-query stores.
//!
//! The engine never owns a schema. It reads server configurations and saved
//! queries through these traits, and writes back only the token cache and the
//! connection-test status. In-memory implementations are provided for tests
//! and for running without a database.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ConfigurationError, QueryError, QueryResult};
use crate::model::{FhirServerConfig, SavedQuery};

/// Read access to server configurations plus the writes the engine performs.
#[async_trait]
pub trait ServerConfigStore: Send + Sync {
    /// Returns every configured server.
    async fn list_servers(&self) -> QueryResult<Vec<FhirServerConfig>>;

    /// Finds a server by name.
    async fn get_server(&self, name: &str) -> QueryResult<FhirServerConfig> {
        self.list_servers()
            .await?
            .into_iter()
            .find(|server| server.name == name)
            .ok_or_else(|| {
                ConfigurationError::ServerNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Persists a refreshed bearer token.
    async fn update_token(
        &self,
        server_id: &str,
        access_token: &str,
        token_expiry: DateTime<Utc>,
    ) -> QueryResult<()>;

    /// Records the outcome of a connection test.
    async fn update_connection_status(
        &self,
        server_id: &str,
        successful: bool,
        attempted_at: DateTime<Utc>,
    ) -> QueryResult<()>;
}

/// Read-only access to saved queries.
#[async_trait]
pub trait SavedQueryStore: Send + Sync {
    /// Loads a saved query by its name.
    ///
    /// Returns a configuration error when no query has that name.
    async fn saved_query_by_name(&self, name: &str) -> QueryResult<SavedQuery>;
}

/// A [`ServerConfigStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryServerConfigStore {
    servers: RwLock<Vec<FhirServerConfig>>,
}

impl InMemoryServerConfigStore {
    /// Creates a store. Each configuration is normalised on the way in.
    pub fn new(servers: Vec<FhirServerConfig>) -> Self {
        Self {
            servers: RwLock::new(
                servers
                    .into_iter()
                    .map(FhirServerConfig::normalized)
                    .collect(),
            ),
        }
    }

    /// Loads a JSON array of server configurations.
    pub fn from_json_file(path: impl AsRef<Path>) -> QueryResult<Self> {
        let servers: Vec<FhirServerConfig> = read_json(path.as_ref())?;
        debug!(path = %path.as_ref().display(), count = servers.len(), "Loaded FHIR server configurations");
        Ok(Self::new(servers))
    }

    /// Adds or replaces a server, matching on id.
    pub fn upsert(&self, server: FhirServerConfig) {
        let server = server.normalized();
        let mut servers = self.servers.write();
        match servers.iter_mut().find(|s| s.id == server.id) {
            Some(existing) => *existing = server,
            None => servers.push(server),
        }
    }

    /// Snapshot of one server by id.
    pub fn find_by_id(&self, id: &str) -> Option<FhirServerConfig> {
        self.servers.read().iter().find(|s| s.id == id).cloned()
    }

    fn modify(&self, server_id: &str, f: impl FnOnce(&mut FhirServerConfig)) -> QueryResult<()> {
        let mut servers = self.servers.write();
        let server = servers
            .iter_mut()
            .find(|s| s.id == server_id)
            .ok_or_else(|| QueryError::store(format!("no server with id {server_id}")))?;
        f(server);
        Ok(())
    }
}

#[async_trait]
impl ServerConfigStore for InMemoryServerConfigStore {
    async fn list_servers(&self) -> QueryResult<Vec<FhirServerConfig>> {
        Ok(self.servers.read().clone())
    }

    async fn update_token(
        &self,
        server_id: &str,
        access_token: &str,
        token_expiry: DateTime<Utc>,
    ) -> QueryResult<()> {
        self.modify(server_id, |server| {
            server.access_token = Some(access_token.to_string());
            server.token_expiry = Some(token_expiry);
        })
    }

    async fn update_connection_status(
        &self,
        server_id: &str,
        successful: bool,
        attempted_at: DateTime<Utc>,
    ) -> QueryResult<()> {
        self.modify(server_id, |server| {
            server.last_connection_attempt = Some(attempted_at);
            server.last_connection_successful = Some(successful);
        })
    }
}

/// Caches the full server list of another store.
///
/// The list is fetched once and served from memory until
/// [`invalidate`](Self::invalidate) is called. Writes go to the inner store
/// and invalidate the cache after they succeed.
#[derive(Debug)]
pub struct CachedServerConfigStore<S> {
    inner: S,
    cache: RwLock<Option<Vec<FhirServerConfig>>>,
}

impl<S: ServerConfigStore> CachedServerConfigStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: RwLock::new(None),
        }
    }

    /// Drops the cached list; the next read refetches.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cache.read().is_some()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ServerConfigStore> ServerConfigStore for CachedServerConfigStore<S> {
    async fn list_servers(&self) -> QueryResult<Vec<FhirServerConfig>> {
        let cached = self.cache.read().clone();
        if let Some(servers) = cached {
            return Ok(servers);
        }

        let servers = self.inner.list_servers().await?;
        *self.cache.write() = Some(servers.clone());
        Ok(servers)
    }

    async fn update_token(
        &self,
        server_id: &str,
        access_token: &str,
        token_expiry: DateTime<Utc>,
    ) -> QueryResult<()> {
        self.inner
            .update_token(server_id, access_token, token_expiry)
            .await?;
        self.invalidate();
        Ok(())
    }

    async fn update_connection_status(
        &self,
        server_id: &str,
        successful: bool,
        attempted_at: DateTime<Utc>,
    ) -> QueryResult<()> {
        self.inner
            .update_connection_status(server_id, successful, attempted_at)
            .await?;
        self.invalidate();
        Ok(())
    }
}

/// A [`SavedQueryStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemorySavedQueryStore {
    queries: RwLock<Vec<SavedQuery>>,
}

impl InMemorySavedQueryStore {
    pub fn new(queries: Vec<SavedQuery>) -> Self {
        Self {
            queries: RwLock::new(queries),
        }
    }

    /// Loads a JSON array of saved queries.
    pub fn from_json_file(path: impl AsRef<Path>) -> QueryResult<Self> {
        let queries: Vec<SavedQuery> = read_json(path.as_ref())?;
        debug!(path = %path.as_ref().display(), count = queries.len(), "Loaded saved queries");
        Ok(Self::new(queries))
    }

    pub fn insert(&self, query: SavedQuery) {
        let mut queries = self.queries.write();
        queries.retain(|q| q.query_name != query.query_name);
        queries.push(query);
    }
}

#[async_trait]
impl SavedQueryStore for InMemorySavedQueryStore {
    async fn saved_query_by_name(&self, name: &str) -> QueryResult<SavedQuery> {
        self.queries
            .read()
            .iter()
            .find(|q| q.query_name == name)
            .cloned()
            .ok_or_else(|| {
                ConfigurationError::QueryNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> QueryResult<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| QueryError::store(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| QueryError::store(format!("failed to parse {}: {e}", path.display())))
}
