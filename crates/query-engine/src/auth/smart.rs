//! SMART backend-services signing keys and client assertions.
//!
//! A single RSA key pair is generated lazily on first use and persisted as
//! `rsa-private.pem`, `rsa-public.pem` and `jwks.json` in the keys directory.
//! Later calls, in this process or the next, load the files instead of
//! regenerating. Within one process generation happens at most once. Two
//! processes starting cold against the same directory may both generate; the
//! last writer's key pair is the one that survives.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AuthResult, AuthenticationError};

/// Private key file name.
pub const PRIVATE_KEY_FILE: &str = "rsa-private.pem";
/// Public key file name.
pub const PUBLIC_KEY_FILE: &str = "rsa-public.pem";
/// JWKS file name.
pub const JWKS_FILE: &str = "jwks.json";

/// The `jku` used when no application hostname is configured.
pub const DEFAULT_JWKS_URL: &str = "http://host.docker.internal:3000/.well-known/jwks.json";

/// Signing algorithm for client assertions.
pub const ASSERTION_ALGORITHM: Algorithm = Algorithm::RS384;

/// Lifetime of a client assertion, in seconds.
pub const ASSERTION_LIFETIME_SECS: i64 = 300;

const RSA_KEY_BITS: usize = 2048;

/// Claims of a SMART backend-services client assertion.
#[derive(Debug, Clone, Serialize)]
struct ClientAssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

struct SigningKey {
    kid: String,
    encoding_key: EncodingKey,
    jwks: Value,
}

/// Owns the SMART signing key pair and its JWKS.
pub struct SmartKeyStore {
    keys_dir: PathBuf,
    jwks_url: String,
    loaded: Mutex<Option<Arc<SigningKey>>>,
}

impl std::fmt::Debug for SmartKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartKeyStore")
            .field("keys_dir", &self.keys_dir)
            .field("jwks_url", &self.jwks_url)
            .finish_non_exhaustive()
    }
}

impl SmartKeyStore {
    /// Creates a store rooted at `keys_dir`. Nothing is read until first use.
    pub fn new(keys_dir: impl Into<PathBuf>, jwks_url: impl Into<String>) -> Self {
        Self {
            keys_dir: keys_dir.into(),
            jwks_url: jwks_url.into(),
            loaded: Mutex::new(None),
        }
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    /// The absolute URL advertised as the assertion `jku`.
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// The public JWKS document, generating the key pair if needed.
    pub fn jwks(&self) -> AuthResult<Value> {
        Ok(self.signing_key()?.jwks.clone())
    }

    /// The key id advertised in the JWKS.
    pub fn key_id(&self) -> AuthResult<String> {
        Ok(self.signing_key()?.kid.clone())
    }

    /// Signs a client assertion for `client_id` against `token_endpoint`.
    pub fn create_client_assertion(
        &self,
        client_id: &str,
        token_endpoint: &str,
    ) -> AuthResult<String> {
        let key = self.signing_key()?;

        let mut header = Header::new(ASSERTION_ALGORITHM);
        header.typ = Some("JWT".to_string());
        header.kid = Some(key.kid.clone());
        header.jku = Some(self.jwks_url.clone());

        let now = Utc::now().timestamp();
        let claims = ClientAssertionClaims {
            iss: client_id,
            sub: client_id,
            aud: token_endpoint,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
            jti: Uuid::new_v4().to_string(),
        };

        let jwt = jsonwebtoken::encode(&header, &claims, &key.encoding_key)?;
        debug!(client_id = %client_id, aud = %token_endpoint, "Signed SMART client assertion");
        Ok(jwt)
    }

    /// Loads the key pair from disk, generating and persisting it first if
    /// it does not exist yet.
    pub fn ensure_keys(&self) -> AuthResult<()> {
        self.signing_key().map(|_| ())
    }

    fn signing_key(&self) -> AuthResult<Arc<SigningKey>> {
        let mut loaded = self.loaded.lock();
        if let Some(key) = loaded.as_ref() {
            return Ok(Arc::clone(key));
        }

        let private_path = self.keys_dir.join(PRIVATE_KEY_FILE);
        let jwks_path = self.keys_dir.join(JWKS_FILE);
        if !private_path.exists() || !jwks_path.exists() {
            self.generate()?;
        }

        let key = Arc::new(load_signing_key(&private_path, &jwks_path)?);
        *loaded = Some(Arc::clone(&key));
        Ok(key)
    }

    fn generate(&self) -> AuthResult<()> {
        info!(keys_dir = %self.keys_dir.display(), "Generating SMART signing key pair");

        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).map_err(key_error)?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private.to_pkcs8_pem(LineEnding::LF).map_err(key_error)?;
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(key_error)?;

        let kid = Uuid::new_v4().to_string();
        let jwks = json!({
            "keys": [{
                "kty": "RSA",
                "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
                "kid": kid,
                "alg": "RS384",
                "use": "sig",
            }]
        });
        let jwks_text = serde_json::to_string_pretty(&jwks).map_err(key_error)?;

        fs::create_dir_all(&self.keys_dir)?;
        write_private(&self.keys_dir.join(PRIVATE_KEY_FILE), private_pem.as_bytes())?;
        fs::write(self.keys_dir.join(PUBLIC_KEY_FILE), public_pem)?;
        fs::write(self.keys_dir.join(JWKS_FILE), jwks_text)?;

        info!(kid = %kid, "SMART signing key pair written");
        Ok(())
    }
}

fn load_signing_key(private_path: &Path, jwks_path: &Path) -> AuthResult<SigningKey> {
    let pem = fs::read(private_path)?;
    let encoding_key = EncodingKey::from_rsa_pem(&pem).map_err(key_error)?;

    let jwks: Value = serde_json::from_slice(&fs::read(jwks_path)?).map_err(key_error)?;
    let kid = jwks["keys"][0]["kid"]
        .as_str()
        .ok_or_else(|| AuthenticationError::KeyMaterial {
            message: format!("no key ID found in {}", jwks_path.display()),
        })?
        .to_string();

    Ok(SigningKey {
        kid,
        encoding_key,
        jwks,
    })
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    fs::write(path, contents)
}

fn key_error(err: impl std::fmt::Display) -> AuthenticationError {
    AuthenticationError::KeyMaterial {
        message: err.to_string(),
    }
}
