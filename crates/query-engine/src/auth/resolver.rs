//! Per-server credential resolution.
//!
//! A [`CredentialResolver`] turns a server's [`AuthMethod`] into a
//! [`ResolvedCredential`] before each outbound request. Token-exchange methods
//! (`client_credentials` and `SMART`) cache the issued bearer token until its
//! expiry and refresh it on demand. Concurrent callers that find the cache
//! stale wait on a single refresh instead of each running their own exchange.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::smart::SmartKeyStore;
use crate::error::{
    AuthResult, AuthenticationError, ConfigurationError, QueryResult, TransportError,
};
use crate::model::{AuthMethod, FhirServerConfig};
use crate::store::ServerConfigStore;

/// `client_assertion_type` for SMART backend-services assertions.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3300;

/// Subtracted from every token lifetime so a token is never used in its
/// final minute.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Upper bound on an accepted token lifetime (one year).
pub const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 60 * 60;

const AIDBOX_SERVER_NAME: &str = "Aidbox";
const AIDBOX_DEFAULT_SCOPE: &str = "system/*.read";

/// The credential to attach to one outbound request.
#[derive(Clone, PartialEq, Eq)]
pub enum ResolvedCredential {
    /// Custom headers only.
    None,
    /// `Authorization: Bearer {token}`.
    Bearer {
        token: String,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Authentication happens during the TLS handshake.
    ClientCertificate,
}

impl ResolvedCredential {
    /// The `Authorization` header value, if this credential uses one.
    pub fn authorization_header(&self) -> Option<String> {
        match self {
            ResolvedCredential::Bearer { token, .. } => Some(format!("Bearer {token}")),
            _ => None,
        }
    }
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedCredential::None => write!(f, "None"),
            ResolvedCredential::Bearer { expires_at, .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .field("expires_at", expires_at)
                .finish(),
            ResolvedCredential::ClientCertificate => write!(f, "ClientCertificate"),
        }
    }
}

/// Observable state of a server's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// The auth method never exchanges for a token.
    NoAuthNeeded,
    /// A token is cached and still valid.
    TokenCached,
    /// No usable token; the next request refreshes.
    TokenExpired,
    /// A refresh is in flight.
    Refreshing,
    /// The most recent refresh failed; the next request retries.
    RefreshFailed,
}

/// A token issued by a token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Issue time plus `expires_in`, minus [`EXPIRY_MARGIN_SECS`].
    pub expires_at: DateTime<Utc>,
}

impl TokenGrant {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Default)]
struct TokenCache {
    token: Option<TokenGrant>,
    last_refresh_failed: bool,
}

/// Resolves credentials for one FHIR server.
pub struct CredentialResolver {
    server_id: String,
    server_name: String,
    hostname: String,
    auth: AuthMethod,
    http: reqwest::Client,
    keys: Arc<SmartKeyStore>,
    cache: RwLock<TokenCache>,
    refresh_guard: Mutex<()>,
    discovered_endpoint: RwLock<Option<String>>,
    token_store: Option<Arc<dyn ServerConfigStore>>,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("server_name", &self.server_name)
            .field("auth_type", &self.auth.auth_type())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CredentialResolver {
    /// Creates a resolver for `config`.
    ///
    /// `http` must carry the same TLS settings as the server's resource
    /// client so token requests honour `disableCertValidation`. A token
    /// already cached in `config` is reused until it expires.
    pub fn new(
        config: &FhirServerConfig,
        http: reqwest::Client,
        keys: Arc<SmartKeyStore>,
    ) -> QueryResult<Self> {
        validate_auth(&config.auth)?;

        let token = match (&config.access_token, config.token_expiry) {
            (Some(access_token), Some(expires_at)) if config.auth.uses_token_exchange() => {
                Some(TokenGrant {
                    access_token: access_token.clone(),
                    expires_at,
                })
            }
            _ => None,
        };

        Ok(Self {
            server_id: config.id.clone(),
            server_name: config.name.clone(),
            hostname: config.hostname.trim_end_matches('/').to_string(),
            auth: config.auth.clone(),
            http,
            keys,
            cache: RwLock::new(TokenCache {
                token,
                last_refresh_failed: false,
            }),
            refresh_guard: Mutex::new(()),
            discovered_endpoint: RwLock::new(None),
            token_store: None,
        })
    }

    /// Persists every refreshed token through `store`.
    ///
    /// The write runs in the background; request completion never waits on
    /// it and a failed write is only logged.
    pub fn with_token_store(mut self, store: Arc<dyn ServerConfigStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn auth(&self) -> &AuthMethod {
        &self.auth
    }

    /// Current credential state.
    pub fn state(&self) -> CredentialState {
        if !self.auth.uses_token_exchange() {
            return CredentialState::NoAuthNeeded;
        }
        if self.refresh_guard.try_lock().is_err() {
            return CredentialState::Refreshing;
        }

        let cache = self.cache.read();
        match &cache.token {
            Some(token) if token.is_valid_at(Utc::now()) => CredentialState::TokenCached,
            _ if cache.last_refresh_failed => CredentialState::RefreshFailed,
            _ => CredentialState::TokenExpired,
        }
    }

    /// The most recently cached token, valid or not.
    pub fn cached_token(&self) -> Option<TokenGrant> {
        self.cache.read().token.clone()
    }

    /// Returns a credential that is valid now, refreshing it if needed.
    pub async fn resolve(&self) -> QueryResult<ResolvedCredential> {
        match &self.auth {
            AuthMethod::None => Ok(ResolvedCredential::None),
            AuthMethod::Basic { bearer_token } => Ok(bearer_token
                .as_ref()
                .map(|token| ResolvedCredential::Bearer {
                    token: token.clone(),
                    expires_at: None,
                })
                .unwrap_or(ResolvedCredential::None)),
            AuthMethod::MutualTls { .. } => Ok(ResolvedCredential::ClientCertificate),
            AuthMethod::ClientCredentials { .. } | AuthMethod::Smart { .. } => {
                self.resolve_bearer().await
            }
        }
    }

    async fn resolve_bearer(&self) -> QueryResult<ResolvedCredential> {
        if let Some(token) = self.valid_cached_token() {
            return Ok(bearer(token));
        }

        let _guard = self.refresh_guard.lock().await;
        if let Some(token) = self.valid_cached_token() {
            debug!(server = %self.server_name, "Token refreshed by a concurrent request");
            return Ok(bearer(token));
        }

        let result = self.exchange().await;
        let mut cache = self.cache.write();
        match result {
            Ok(grant) => {
                info!(server = %self.server_name, expires_at = %grant.expires_at, "Obtained new access token");
                cache.token = Some(grant.clone());
                cache.last_refresh_failed = false;
                drop(cache);
                self.persist(&grant);
                Ok(bearer(grant))
            }
            Err(err) => {
                cache.last_refresh_failed = true;
                error!(server = %self.server_name, error = %err, "Token refresh failed");
                Err(err)
            }
        }
    }

    fn valid_cached_token(&self) -> Option<TokenGrant> {
        self.cache
            .read()
            .token
            .as_ref()
            .filter(|token| token.is_valid_at(Utc::now()))
            .cloned()
    }

    async fn exchange(&self) -> QueryResult<TokenGrant> {
        let (client_id, scopes) = match &self.auth {
            AuthMethod::ClientCredentials {
                client_id, scopes, ..
            }
            | AuthMethod::Smart {
                client_id, scopes, ..
            } => (client_id.clone(), scopes.clone()),
            other => {
                return Err(ConfigurationError::MissingAuthField {
                    auth_type: other.auth_type(),
                    field: "client_id",
                }
                .into());
            }
        };
        let token_endpoint = self.token_endpoint().await?;

        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id.clone()),
        ];

        let scope = scopes.filter(|s| !s.trim().is_empty()).or_else(|| {
            (self.server_name == AIDBOX_SERVER_NAME).then(|| AIDBOX_DEFAULT_SCOPE.to_string())
        });
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }

        match &self.auth {
            AuthMethod::Smart { .. } => {
                let assertion = self.sign_assertion(&client_id, &token_endpoint).await?;
                form.push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()));
                form.push(("client_assertion", assertion));
            }
            AuthMethod::ClientCredentials { client_secret, .. } => {
                form.push(("client_secret", client_secret.clone()));
            }
            _ => {}
        }

        debug!(server = %self.server_name, token_endpoint = %token_endpoint, "Requesting access token");
        let response = self
            .http
            .post(&token_endpoint)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&token_endpoint, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&token_endpoint, e))?;

        Ok(parse_token_response(status, body, Utc::now())?)
    }

    async fn sign_assertion(&self, client_id: &str, token_endpoint: &str) -> AuthResult<String> {
        let keys = Arc::clone(&self.keys);
        let client_id = client_id.to_string();
        let audience = token_endpoint.to_string();

        // Key generation on first use is CPU-bound.
        tokio::task::spawn_blocking(move || keys.create_client_assertion(&client_id, &audience))
            .await
            .map_err(|e| AuthenticationError::JwtSigning {
                message: e.to_string(),
            })?
    }

    /// The configured token endpoint, or the one advertised in the server's
    /// SMART configuration.
    pub async fn token_endpoint(&self) -> QueryResult<String> {
        match &self.auth {
            AuthMethod::ClientCredentials { token_endpoint, .. } => Ok(token_endpoint.clone()),
            AuthMethod::Smart {
                token_endpoint: Some(endpoint),
                ..
            } if !endpoint.trim().is_empty() => Ok(endpoint.clone()),
            AuthMethod::Smart { .. } => {
                let discovered = self.discovered_endpoint.read().clone();
                if let Some(endpoint) = discovered {
                    return Ok(endpoint);
                }
                let endpoint = self.discover_token_endpoint().await?;
                *self.discovered_endpoint.write() = Some(endpoint.clone());
                Ok(endpoint)
            }
            other => Err(ConfigurationError::MissingAuthField {
                auth_type: other.auth_type(),
                field: "token_endpoint",
            }
            .into()),
        }
    }

    async fn discover_token_endpoint(&self) -> AuthResult<String> {
        let url = format!("{}/.well-known/smart-configuration", self.hostname);
        let failed = |message: String| AuthenticationError::DiscoveryFailed {
            url: url.clone(),
            message,
        };

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!(
                "failed to fetch SMART configuration: {}",
                response.status().as_u16()
            )));
        }

        let document: Value = response.json().await.map_err(|e| failed(e.to_string()))?;
        let endpoint = document
            .get("token_endpoint")
            .and_then(Value::as_str)
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_string)
            .ok_or_else(|| failed("token endpoint not found in SMART configuration".to_string()))?;

        info!(server = %self.server_name, token_endpoint = %endpoint, "Discovered SMART token endpoint");
        Ok(endpoint)
    }

    fn persist(&self, grant: &TokenGrant) {
        let Some(store) = self.token_store.clone() else {
            return;
        };
        let server_id = self.server_id.clone();
        let server_name = self.server_name.clone();
        let grant = grant.clone();

        tokio::spawn(async move {
            if let Err(err) = store
                .update_token(&server_id, &grant.access_token, grant.expires_at)
                .await
            {
                warn!(server = %server_name, error = %err, "Failed to persist refreshed token");
            }
        });
    }
}

fn bearer(grant: TokenGrant) -> ResolvedCredential {
    ResolvedCredential::Bearer {
        token: grant.access_token,
        expires_at: Some(grant.expires_at),
    }
}

fn require(value: &str, auth_type: &'static str, field: &'static str) -> QueryResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigurationError::MissingAuthField { auth_type, field }.into());
    }
    Ok(())
}

/// Checks that every field the auth method depends on is present.
pub fn validate_auth(auth: &AuthMethod) -> QueryResult<()> {
    let auth_type = auth.auth_type();
    match auth {
        AuthMethod::None | AuthMethod::Basic { .. } => Ok(()),
        AuthMethod::ClientCredentials {
            client_id,
            client_secret,
            token_endpoint,
            ..
        } => {
            require(client_id, auth_type, "client_id")?;
            require(client_secret, auth_type, "client_secret")?;
            require(token_endpoint, auth_type, "token_endpoint")
        }
        AuthMethod::Smart { client_id, .. } => require(client_id, auth_type, "client_id"),
        AuthMethod::MutualTls {
            client_cert,
            client_key,
            ..
        } => {
            require(client_cert, auth_type, "client_cert")?;
            require(client_key, auth_type, "client_key")
        }
    }
}

/// Interprets a token endpoint response.
pub fn parse_token_response(
    status: reqwest::StatusCode,
    body: String,
    now: DateTime<Utc>,
) -> AuthResult<TokenGrant> {
    if !status.is_success() {
        return Err(AuthenticationError::TokenRequestFailed {
            status: status.as_u16(),
            body,
        });
    }

    let document: Value = match serde_json::from_str(&body) {
        Ok(document) => document,
        Err(_) => return Err(AuthenticationError::InvalidTokenResponse { body }),
    };

    let Some(access_token) = document
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
    else {
        return Err(AuthenticationError::MissingAccessToken { body });
    };

    let expires_in = document
        .get("expires_in")
        .and_then(|v| v.as_i64().or_else(|| v.as_str()?.parse().ok()))
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
        .min(MAX_EXPIRES_IN_SECS);

    let Some(expires_at) = Duration::try_seconds(expires_in - EXPIRY_MARGIN_SECS)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
    else {
        return Err(AuthenticationError::InvalidTokenResponse { body });
    };

    Ok(TokenGrant {
        access_token: access_token.to_string(),
        expires_at,
    })
}
