//! Server configuration for the query connector.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QC_SERVER_PORT` | 3000 | Server port |
//! | `QC_SERVER_HOST` | 127.0.0.1 | Host to bind |
//! | `QC_LOG_LEVEL` | info | Log level |
//! | `QC_REQUEST_TIMEOUT` | 60 | Inbound request timeout (seconds) |
//! | `QC_FHIR_TIMEOUT` | - | Outbound FHIR request timeout (seconds) |
//! | `QC_APP_HOSTNAME` | - | Public base URL, used for the SMART `jku` |
//! | `QC_KEYS_DIR` | keys | Directory holding the SMART key pair |
//! | `QC_FHIR_SERVERS_FILE` | - | JSON array of FHIR server configurations |
//! | `QC_SAVED_QUERIES_FILE` | - | JSON array of saved queries |
//! | `QC_ENABLE_CORS` | true | Enable CORS |
//! | `QC_CORS_ORIGINS` | * | Allowed origins |
//!
//! # Example
//!
//! ```rust
//! use helios_query_connector::ServerConfig;
//!
//! let config = ServerConfig {
//!     port: 8080,
//!     app_hostname: Some("https://qc.example.org".to_string()),
//!     ..Default::default()
//! };
//! assert_eq!(config.jwks_url(), "https://qc.example.org/.well-known/jwks.json");
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use helios_query_engine::ClientOptions;
use helios_query_engine::auth::DEFAULT_JWKS_URL;
use helios_query_engine::config::DEFAULT_KEYS_DIR;

/// Configuration for the query connector server.
///
/// Built from command line arguments with [`ServerConfig::parse`], from the
/// environment with [`ServerConfig::from_env`], or programmatically.
#[derive(Debug, Clone, Parser)]
#[command(name = "query-connector")]
#[command(about = "FHIR query connector for public-health case investigation")]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(short, long, env = "QC_SERVER_PORT", default_value = "3000")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "QC_SERVER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "QC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Inbound request timeout in seconds.
    #[arg(long, env = "QC_REQUEST_TIMEOUT", default_value = "60")]
    pub request_timeout: u64,

    /// Outbound FHIR request timeout in seconds. Unset means no deadline.
    #[arg(long, env = "QC_FHIR_TIMEOUT")]
    pub fhir_timeout: Option<u64>,

    /// Public base URL of this deployment.
    #[arg(long, env = "QC_APP_HOSTNAME")]
    pub app_hostname: Option<String>,

    /// Directory holding the SMART signing key pair and JWKS.
    #[arg(long, env = "QC_KEYS_DIR", default_value = DEFAULT_KEYS_DIR)]
    pub keys_dir: PathBuf,

    /// JSON file with the FHIR server configurations.
    #[arg(long, env = "QC_FHIR_SERVERS_FILE")]
    pub fhir_servers_file: Option<PathBuf>,

    /// JSON file with the saved queries.
    #[arg(long, env = "QC_SAVED_QUERIES_FILE")]
    pub saved_queries_file: Option<PathBuf>,

    /// Enable CORS.
    #[arg(long, env = "QC_ENABLE_CORS", default_value = "true")]
    pub enable_cors: bool,

    /// Allowed CORS origins (comma-separated, or * for all).
    #[arg(long, env = "QC_CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "127.0.0.1".to_string(),
            log_level: "info".to_string(),
            request_timeout: 60,
            fhir_timeout: None,
            app_hostname: None,
            keys_dir: PathBuf::from(DEFAULT_KEYS_DIR),
            fhir_servers_file: None,
            saved_queries_file: None,
            enable_cors: true,
            cors_origins: "*".to_string(),
        }
    }
}

impl ServerConfig {
    /// Parses the environment without requiring command line arguments.
    pub fn from_env() -> Self {
        Self::try_parse_from(["query-connector"]).unwrap_or_default()
    }

    /// Returns the socket address to bind to.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The URL advertised as the `jku` of SMART client assertions.
    pub fn jwks_url(&self) -> String {
        match self.app_hostname.as_deref().map(str::trim) {
            Some(hostname) if !hostname.is_empty() => format!(
                "{}/.well-known/jwks.json",
                hostname.trim_end_matches('/')
            ),
            _ => DEFAULT_JWKS_URL.to_string(),
        }
    }

    /// Engine options derived from this configuration.
    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::default().with_keys_dir(&self.keys_dir);
        options.jwks_url = self.jwks_url();
        if let Some(secs) = self.fhir_timeout {
            options = options.with_timeout(Duration::from_secs(secs));
        }
        options
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("Port cannot be 0".to_string());
        }
        if self.request_timeout == 0 {
            errors.push("Request timeout cannot be 0".to_string());
        }
        if self.fhir_timeout == Some(0) {
            errors.push("FHIR timeout cannot be 0".to_string());
        }
        if let Some(hostname) = &self.app_hostname {
            if !hostname.starts_with("http://") && !hostname.starts_with("https://") {
                errors.push(format!("App hostname must be an http(s) URL: {hostname}"));
            }
        }
        for path in [&self.fhir_servers_file, &self.saved_queries_file]
            .into_iter()
            .flatten()
        {
            if !path.is_file() {
                errors.push(format!("File not found: {}", path.display()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration suitable for testing.
    ///
    /// Uses ephemeral port 0, a short timeout and no CORS.
    pub fn for_testing() -> Self {
        Self {
            port: 0,
            log_level: "debug".to_string(),
            request_timeout: 5,
            fhir_timeout: Some(5),
            enable_cors: false,
            ..Default::default()
        }
    }
}
