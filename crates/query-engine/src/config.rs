//! Engine-level options shared by every FHIR client.

use std::path::PathBuf;
use std::time::Duration;

use crate::auth::DEFAULT_JWKS_URL;

/// Default directory for the SMART signing keys.
pub const DEFAULT_KEYS_DIR: &str = "keys";

/// Options applied to every outbound HTTP client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-request timeout. `None` leaves the deadline to the caller.
    pub timeout: Option<Duration>,
    pub user_agent: String,
    /// Absolute URL of this deployment's JWKS, used as the SMART `jku`.
    pub jwks_url: String,
    /// Where the SMART signing key pair is kept.
    pub keys_dir: PathBuf,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            user_agent: format!("helios-query-engine/{}", env!("CARGO_PKG_VERSION")),
            jwks_url: DEFAULT_JWKS_URL.to_string(),
            keys_dir: PathBuf::from(DEFAULT_KEYS_DIR),
        }
    }
}

impl ClientOptions {
    /// Derives the JWKS URL from the public application hostname.
    pub fn with_app_hostname(mut self, app_hostname: &str) -> Self {
        self.jwks_url = format!(
            "{}/.well-known/jwks.json",
            app_hostname.trim_end_matches('/')
        );
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_keys_dir(mut self, keys_dir: impl Into<PathBuf>) -> Self {
        self.keys_dir = keys_dir.into();
        self
    }
}
