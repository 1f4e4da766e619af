//! Credential resolution for FHIR servers.
//!
//! - [`CredentialResolver`]: per-server token cache and exchange
//! - [`SmartKeyStore`]: the SMART signing key pair and its JWKS

mod resolver;
mod smart;

pub use resolver::{
    CLIENT_ASSERTION_TYPE, CredentialResolver, CredentialState, DEFAULT_EXPIRES_IN_SECS,
    EXPIRY_MARGIN_SECS, ResolvedCredential, TokenGrant, parse_token_response, validate_auth,
};
pub use smart::{
    ASSERTION_ALGORITHM, ASSERTION_LIFETIME_SECS, DEFAULT_JWKS_URL, JWKS_FILE, PRIVATE_KEY_FILE,
    PUBLIC_KEY_FILE, SmartKeyStore,
};
