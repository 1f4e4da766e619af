//! FHIR server configuration.
//!
//! One [`FhirServerConfig`] exists per configured remote server. The
//! authentication method is a tagged union so each variant only carries the
//! fields it needs; it serialises with an `authType` discriminant.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header name the engine manages itself.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// How the engine authenticates against a FHIR server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "authType")]
pub enum AuthMethod {
    /// No authentication (custom headers only).
    #[default]
    #[serde(rename = "none")]
    None,

    /// A static bearer token entered by an administrator.
    #[serde(rename = "basic", rename_all = "camelCase")]
    Basic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bearer_token: Option<String>,
    },

    /// OAuth2 client-credentials grant with a shared secret.
    #[serde(rename = "client_credentials", rename_all = "camelCase")]
    ClientCredentials {
        client_id: String,
        client_secret: String,
        token_endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scopes: Option<String>,
    },

    /// SMART backend services: client-credentials grant with a signed JWT
    /// assertion. The token endpoint is discovered when not configured.
    #[serde(rename = "SMART", rename_all = "camelCase")]
    Smart {
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scopes: Option<String>,
    },

    /// Mutual TLS: a PEM client certificate and key presented during the
    /// handshake, optionally validating the server against a CA certificate.
    #[serde(rename = "mutual-tls", rename_all = "camelCase")]
    MutualTls {
        client_cert: String,
        client_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ca_cert: Option<String>,
    },
}

impl AuthMethod {
    /// Returns the stored `authType` string.
    pub fn auth_type(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Basic { .. } => "basic",
            AuthMethod::ClientCredentials { .. } => "client_credentials",
            AuthMethod::Smart { .. } => "SMART",
            AuthMethod::MutualTls { .. } => "mutual-tls",
        }
    }

    /// Returns true for the methods that exchange for a bearer token.
    pub fn uses_token_exchange(&self) -> bool {
        matches!(
            self,
            AuthMethod::ClientCredentials { .. } | AuthMethod::Smart { .. }
        )
    }
}

/// Configuration of one remote FHIR server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FhirServerConfig {
    pub id: String,
    pub name: String,
    /// Base URL, e.g. `https://fhir.example.org/fhir`.
    pub hostname: String,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub disable_cert_validation: bool,
    #[serde(flatten)]
    pub auth: AuthMethod,
    /// Cached bearer token for token-exchange auth methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Instant after which `access_token` must not be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connection_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connection_successful: Option<bool>,
}

impl FhirServerConfig {
    /// Creates a configuration with no authentication.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            hostname: hostname.into(),
            headers: BTreeMap::new(),
            disable_cert_validation: false,
            auth: AuthMethod::None,
            access_token: None,
            token_expiry: None,
            last_connection_attempt: None,
            last_connection_successful: None,
        }
    }

    /// Sets the authentication method.
    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    /// Adds a custom header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Seeds the token cache.
    pub fn with_cached_token(mut self, token: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        self.access_token = Some(token.into());
        self.token_expiry = Some(expiry);
        self
    }

    /// Returns the configuration as it should be stored.
    ///
    /// A `basic` server without a token field takes its token from a stored
    /// `Authorization: Bearer …` header. Every user-supplied `Authorization`
    /// header is then removed so it cannot shadow the managed credential.
    pub fn normalized(mut self) -> Self {
        let stored_auth = self
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(AUTHORIZATION_HEADER))
            .map(|(_, value)| value.clone());

        if let AuthMethod::Basic { bearer_token } = &mut self.auth {
            if bearer_token.is_none() {
                *bearer_token = stored_auth
                    .as_deref()
                    .and_then(|value| value.strip_prefix("Bearer "))
                    .map(|token| token.trim().to_string())
                    .filter(|token| !token.is_empty());
            }
        }

        self.headers
            .retain(|name, _| !name.eq_ignore_ascii_case(AUTHORIZATION_HEADER));
        self
    }

    /// Custom headers minus any `Authorization` entry.
    pub fn custom_headers(&self) -> impl Iterator<Item = (&String, &String)> {
        self.headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case(AUTHORIZATION_HEADER))
    }

    /// Joins a request path onto the configured base URL.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.hostname.trim_end_matches('/'), path)
    }
}
