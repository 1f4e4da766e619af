//! Authenticated HTTP access to one FHIR server.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Certificate, Identity};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{CredentialResolver, ResolvedCredential, SmartKeyStore};
use crate::compiler::{SearchMethod, SearchRequest};
use crate::config::ClientOptions;
use crate::error::{ConfigurationError, QueryResult, TransportError};
use crate::model::{AuthMethod, FhirServerConfig};
use crate::store::ServerConfigStore;

/// Media type requested for every FHIR read.
pub const FHIR_JSON: &str = "application/fhir+json";

/// Search used to probe a server during a connection test.
pub const CONNECTION_TEST_PATH: &str =
    "/Patient?name=AuthenticatedServerConnectionTest&_summary=count&_count=1";

/// A raw response from a FHIR server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FhirResponse {
    pub status: u16,
    /// The URL the request was sent to.
    pub url: String,
    pub body: String,
}

impl FhirResponse {
    /// True for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.body)
    }
}

/// Outcome of [`FhirClient::test_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionTestResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Issues GET and POST requests against one FHIR base URL.
///
/// Each request carries the configured custom headers and the credential
/// resolved for this server; `Authorization` from the credential always wins.
pub struct FhirClient {
    config: FhirServerConfig,
    http: reqwest::Client,
    headers: HeaderMap,
    resolver: CredentialResolver,
}

impl fmt::Debug for FhirClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FhirClient")
            .field("name", &self.config.name)
            .field("hostname", &self.config.hostname)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl FhirClient {
    /// Builds a client for `config`.
    ///
    /// Fails with a configuration error when the auth method is missing a
    /// required field, a custom header is not a valid HTTP header, or the
    /// TLS material cannot be loaded.
    pub fn new(
        config: FhirServerConfig,
        options: &ClientOptions,
        keys: Arc<SmartKeyStore>,
    ) -> QueryResult<Self> {
        let config = config.normalized();
        url::Url::parse(&config.hostname).map_err(|e| ConfigurationError::InvalidUrl {
            url: config.hostname.clone(),
            message: e.to_string(),
        })?;

        let http = build_http_client(&config, options)?;
        let headers = build_headers(&config)?;
        let resolver = CredentialResolver::new(&config, http.clone(), keys)?;

        Ok(Self {
            config,
            http,
            headers,
            resolver,
        })
    }

    /// Persists refreshed tokens through `store`.
    pub fn with_token_store(mut self, store: Arc<dyn ServerConfigStore>) -> Self {
        self.resolver = self.resolver.with_token_store(store);
        self
    }

    pub fn config(&self) -> &FhirServerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Resolves a credential that is valid now.
    pub async fn ensure_credential(&self) -> QueryResult<ResolvedCredential> {
        self.resolver.resolve().await
    }

    /// Sends a GET for `path` (relative to the base URL, query included).
    pub async fn get(&self, path: &str) -> QueryResult<FhirResponse> {
        let credential = self.ensure_credential().await?;
        self.get_with(path, &credential).await
    }

    /// Sends every GET concurrently after one credential check.
    ///
    /// Responses come back in the order of `paths`. The first transport
    /// failure fails the whole batch.
    pub async fn get_batch(&self, paths: &[String]) -> QueryResult<Vec<FhirResponse>> {
        let credential = self.ensure_credential().await?;
        try_join_all(paths.iter().map(|path| self.get_with(path, &credential))).await
    }

    /// Sends a form-encoded POST of `params` to `path`.
    pub async fn post(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> QueryResult<FhirResponse> {
        let credential = self.ensure_credential().await?;
        self.post_with(path, params, &credential).await
    }

    /// Sends a compiled search with an already-resolved credential.
    pub async fn execute_with(
        &self,
        request: &SearchRequest,
        credential: &ResolvedCredential,
    ) -> QueryResult<FhirResponse> {
        match request.method {
            SearchMethod::Get => self.get_with(&request.path_with_query(), credential).await,
            SearchMethod::Post => {
                self.post_with(&request.base_path, &request.params, credential)
                    .await
            }
        }
    }

    /// GET with an already-resolved credential.
    pub async fn get_with(
        &self,
        path: &str,
        credential: &ResolvedCredential,
    ) -> QueryResult<FhirResponse> {
        let url = self.config.url_for(path);
        debug!(server = %self.config.name, url = %url, "GET");
        let request = self.authorize(self.http.get(&url), credential);
        send(request, url).await
    }

    /// Form-encoded POST with an already-resolved credential.
    pub async fn post_with(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
        credential: &ResolvedCredential,
    ) -> QueryResult<FhirResponse> {
        let url = self.config.url_for(path);
        debug!(server = %self.config.name, url = %url, "POST");
        let request = self.authorize(self.http.post(&url).form(params), credential);
        send(request, url).await
    }

    /// Authenticates if needed and probes the server with a cheap search.
    pub async fn test_connection(&self) -> ConnectionTestResult {
        let credential = match self.ensure_credential().await {
            Ok(credential) => credential,
            Err(err) => return ConnectionTestResult::failed(format!("Authentication failed: {err}")),
        };

        match self.get_with(CONNECTION_TEST_PATH, &credential).await {
            Ok(response) if response.is_success() => ConnectionTestResult::ok(),
            Ok(response) => {
                warn!(server = %self.config.name, status = response.status, "Connection test failed");
                ConnectionTestResult::failed(format!(
                    "Server returned {}: {}",
                    response.status, response.body
                ))
            }
            Err(err) => ConnectionTestResult::failed(err.to_string()),
        }
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        credential: &ResolvedCredential,
    ) -> reqwest::RequestBuilder {
        let request = request.headers(self.headers.clone());
        match credential.authorization_header() {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }
}

async fn send(request: reqwest::RequestBuilder, url: String) -> QueryResult<FhirResponse> {
    let response = request
        .send()
        .await
        .map_err(|e| TransportError::from_reqwest(url.as_str(), e))?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| TransportError::from_reqwest(url.as_str(), e))?;
    Ok(FhirResponse { status, url, body })
}

fn build_headers(config: &FhirServerConfig) -> QueryResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(FHIR_JSON));

    for (name, value) in config.custom_headers() {
        let invalid = |message: String| ConfigurationError::InvalidHeader {
            name: name.clone(),
            message,
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

fn build_http_client(
    config: &FhirServerConfig,
    options: &ClientOptions,
) -> QueryResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .user_agent(options.user_agent.as_str());

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    if config.disable_cert_validation {
        warn!(server = %config.name, "Certificate validation is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let AuthMethod::MutualTls {
        client_cert,
        client_key,
        ca_cert,
    } = &config.auth
    {
        let invalid_tls = |e: reqwest::Error| ConfigurationError::InvalidTls {
            message: e.to_string(),
        };

        let pem = format!("{}\n{}\n", client_cert.trim(), client_key.trim());
        builder = builder.identity(Identity::from_pem(pem.as_bytes()).map_err(invalid_tls)?);

        if let Some(ca_cert) = ca_cert.as_deref().filter(|ca| !ca.trim().is_empty()) {
            let ca = Certificate::from_pem(ca_cert.as_bytes()).map_err(invalid_tls)?;
            builder = builder.add_root_certificate(ca);
        }
    }

    builder.build().map_err(|e| {
        ConfigurationError::HttpClient {
            message: e.to_string(),
        }
        .into()
    })
}
