//! Error types for the query engine.
//!
//! This module defines all error types used by the engine, following a
//! hierarchy that separates configuration problems, authentication failures,
//! network failures and problems with what the upstream FHIR server returned.
//!
//! Callers that only need the coarse failure kind can use [`QueryError::kind`].

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// The primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Missing or inconsistent configuration
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Credential exchange or key material failures
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    /// Network-level failures
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The FHIR server answered with a non-200 status.
    #[error("FHIR server returned {status} for {url}: {body}")]
    UpstreamHttp { status: u16, url: String, body: String },

    /// The FHIR server answered 200 with a body that is not a usable Bundle.
    #[error("malformed FHIR response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    /// Patient discovery found nobody to run a records query for.
    #[error("no patient found for discovery request on {fhir_server}")]
    PatientNotFound { fhir_server: String },

    /// An external store failed.
    #[error("store error: {message}")]
    Store { message: String },
}

/// Errors caused by configuration that is missing or unusable.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// No FHIR server configuration exists under that name.
    #[error("no configuration found for server: {name}")]
    ServerNotFound { name: String },

    /// No saved query exists under that name.
    #[error("no saved query named {name}")]
    QueryNotFound { name: String },

    /// A field the configured auth method depends on is empty.
    #[error("{field} is required for {auth_type} authentication")]
    MissingAuthField {
        auth_type: &'static str,
        field: &'static str,
    },

    /// A configured header name or value cannot be sent over HTTP.
    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    /// TLS material (client identity or CA certificate) could not be loaded.
    #[error("invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    /// The server hostname is not a usable base URL.
    #[error("invalid FHIR server URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {message}")]
    HttpClient { message: String },
}

/// Errors raised while obtaining a credential.
#[derive(Error, Debug)]
pub enum AuthenticationError {
    /// The token endpoint answered with a non-2xx status.
    #[error("token request failed with status {status}: {body}")]
    TokenRequestFailed { status: u16, body: String },

    /// The token endpoint answered with something that is not JSON.
    #[error("invalid JSON response from token endpoint: {body}")]
    InvalidTokenResponse { body: String },

    /// The token endpoint answered without an `access_token`.
    #[error("no access token in response: {body}")]
    MissingAccessToken { body: String },

    /// The SMART configuration document could not be used.
    #[error("failed to discover token endpoint at {url}: {message}")]
    DiscoveryFailed { url: String, message: String },

    /// The RSA key pair or JWKS could not be loaded or generated.
    #[error("failed to load signing keys: {message}")]
    KeyMaterial { message: String },

    /// The client assertion could not be signed.
    #[error("failed to create JWT: {message}")]
    JwtSigning { message: String },
}

/// Network-level failures reaching a FHIR server or token endpoint.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request could not be sent or the response could not be read.
    #[error("request to {url} failed: {message}")]
    RequestFailed {
        url: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The request did not complete before the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },
}

impl TransportError {
    /// Wraps a reqwest error raised while talking to `url`.
    pub fn from_reqwest(url: impl Into<String>, err: reqwest::Error) -> Self {
        let url = url.into();
        if err.is_timeout() {
            TransportError::Timeout { url }
        } else {
            TransportError::RequestFailed {
                url,
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

/// Coarse failure kinds, one per entry of the engine's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Authentication,
    Transport,
    UpstreamHttp,
    MalformedResponse,
    PatientNotFound,
    Store,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Transport => "transport",
            ErrorKind::UpstreamHttp => "upstream-http",
            ErrorKind::MalformedResponse => "malformed-response",
            ErrorKind::PatientNotFound => "patient-not-found",
            ErrorKind::Store => "store",
        };
        write!(f, "{}", name)
    }
}

impl QueryError {
    /// Returns the failure kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Configuration(_) => ErrorKind::Configuration,
            QueryError::Authentication(_) => ErrorKind::Authentication,
            QueryError::Transport(_) => ErrorKind::Transport,
            QueryError::UpstreamHttp { .. } => ErrorKind::UpstreamHttp,
            QueryError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            QueryError::PatientNotFound { .. } => ErrorKind::PatientNotFound,
            QueryError::Store { .. } => ErrorKind::Store,
        }
    }

    /// Creates a store error from any displayable message.
    pub fn store(message: impl fmt::Display) -> Self {
        QueryError::Store {
            message: message.to_string(),
        }
    }
}

/// Result type alias for engine operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Result type alias for credential operations.
pub type AuthResult<T> = Result<T, AuthenticationError>;

impl From<std::io::Error> for AuthenticationError {
    fn from(err: std::io::Error) -> Self {
        AuthenticationError::KeyMaterial {
            message: err.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthenticationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthenticationError::JwtSigning {
            message: err.to_string(),
        }
    }
}
