//! Session authentication and payload sealing
//!
//! A [`SecuritySession`] authenticates once against an [`AuthBackend`],
//! then seals and opens every message with ChaCha20-Poly1305:
//!
//! ```text
//! sealed = [nonce: 12][ciphertext: n][tag: 16]
//! ```
//!
//! A fresh random nonce is drawn for every call to [`SecuritySession::encrypt`].
//! Key material is zeroed when the session logs out or is dropped.

use crate::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use parking_lot::RwLock;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key size (256 bits)
pub const KEY_SIZE: usize = 32;

/// AEAD nonce size (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size
pub const TAG_SIZE: usize = 16;

/// Smallest sealed message: nonce plus tag around an empty plaintext
pub const MIN_SEALED_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Username/password pair handed to the authentication backend
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque token issued by the backend on successful authentication
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 chars are enough to correlate log lines
        let shown: String = self.0.chars().take(8).collect();
        write!(f, "SessionToken({}…)", shown)
    }
}

/// 256-bit symmetric key. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh key from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw key bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey(<redacted>)")
    }
}

/// Token and key of an authenticated session
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    token: SessionToken,
    key: SymmetricKey,
}

impl SessionKeys {
    pub fn new(token: SessionToken, key: SymmetricKey) -> Self {
        Self { token, key }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.key.as_bytes()))
    }
}

/// What a backend hands back for accepted credentials
#[derive(Debug)]
pub struct AuthGrant {
    pub token: SessionToken,
    /// Key shared with the host, if the backend negotiated one
    pub key: Option<SymmetricKey>,
}

impl AuthGrant {
    pub fn new(token: SessionToken) -> Self {
        Self { token, key: None }
    }

    pub fn with_key(mut self, key: SymmetricKey) -> Self {
        self.key = Some(key);
        self
    }
}

/// Credential verification and token issuance
pub trait AuthBackend: Send + Sync {
    /// Verify credentials. Rejections use [`CryptoError::AuthenticationFailed`].
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthGrant, CryptoError>;

    /// Name of this backend (for logging)
    fn name(&self) -> &str;
}

/// In-memory backend checking SHA-256 password digests
pub struct StaticAuthBackend {
    users: RwLock<HashMap<String, [u8; 32]>>,
    shared_key: Option<SymmetricKey>,
}

impl StaticAuthBackend {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            shared_key: None,
        }
    }

    /// Register a user by plaintext password
    pub fn with_user(self, username: impl Into<String>, password: &str) -> Self {
        self.register_digest(username, Self::digest(password));
        self
    }

    /// Hand this key to every authenticated session instead of a random one
    pub fn with_shared_key(mut self, key: SymmetricKey) -> Self {
        self.shared_key = Some(key);
        self
    }

    /// Register a user by precomputed digest
    pub fn register_digest(&self, username: impl Into<String>, digest: [u8; 32]) {
        self.users.write().insert(username.into(), digest);
    }

    /// Remove a user
    pub fn revoke(&self, username: &str) -> bool {
        self.users.write().remove(username).is_some()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    /// SHA-256 of a password
    pub fn digest(password: &str) -> [u8; 32] {
        Sha256::digest(password.as_bytes()).into()
    }

    /// 32 random bytes, hex encoded
    pub fn generate_token() -> SessionToken {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        bytes.zeroize();
        SessionToken(hex)
    }
}

impl Default for StaticAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthBackend for StaticAuthBackend {
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthGrant, CryptoError> {
        let users = self.users.read();
        let expected = users.get(&credentials.username).ok_or_else(|| {
            CryptoError::AuthenticationFailed(format!("unknown user: {}", credentials.username))
        })?;

        // Constant-time compare
        let actual = Self::digest(&credentials.password);
        let diff = expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff != 0 {
            return Err(CryptoError::AuthenticationFailed(
                "invalid password".to_string(),
            ));
        }

        let grant = AuthGrant::new(Self::generate_token());
        Ok(match &self.shared_key {
            Some(key) => grant.with_key(key.clone()),
            None => grant,
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Authenticated sealing context for one client
///
/// Safe to share between the send and receive paths; encrypt/decrypt only
/// take a read lock.
pub struct SecuritySession {
    backend: Option<Arc<dyn AuthBackend>>,
    keys: RwLock<Option<SessionKeys>>,
}

impl SecuritySession {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            backend: Some(backend),
            keys: RwLock::new(None),
        }
    }

    /// A session that is already authenticated with known key material
    ///
    /// Used by hosts that accept out-of-band keys. [`authenticate`] fails on
    /// such a session once it has logged out.
    ///
    /// [`authenticate`]: SecuritySession::authenticate
    pub fn preshared(token: SessionToken, key: SymmetricKey) -> Self {
        Self {
            backend: None,
            keys: RwLock::new(Some(SessionKeys::new(token, key))),
        }
    }

    /// Verify credentials and install fresh session keys
    ///
    /// Replaces any prior keys. Returns the issued token.
    pub fn authenticate(&self, credentials: &Credentials) -> Result<SessionToken, CryptoError> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            CryptoError::AuthenticationFailed("no authentication backend".to_string())
        })?;

        let grant = match backend.authenticate(credentials) {
            Ok(grant) => grant,
            Err(e) => {
                warn!(backend = backend.name(), user = %credentials.username, "Authentication rejected: {}", e);
                return Err(e);
            }
        };

        let AuthGrant { token, key } = grant;
        let key = key.unwrap_or_else(SymmetricKey::generate);
        let issued = token.clone();

        // Old keys are zeroed as they drop
        *self.keys.write() = Some(SessionKeys::new(token, key));
        info!(backend = backend.name(), user = %credentials.username, "Authenticated");

        Ok(issued)
    }

    /// Whether session keys are currently installed
    pub fn is_authenticated(&self) -> bool {
        self.keys.read().is_some()
    }

    /// Current session token, if authenticated
    pub fn token(&self) -> Option<SessionToken> {
        self.keys.read().as_ref().map(|k| k.token().clone())
    }

    /// Seal a message: `nonce || ciphertext || tag`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let keys = self.keys.read();
        let keys = keys.as_ref().ok_or(CryptoError::NotAuthenticated)?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let sealed = keys
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a sealed message
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < MIN_SEALED_SIZE {
            return Err(CryptoError::ShortBuffer { len: sealed.len() });
        }

        let keys = self.keys.read();
        let keys = keys.as_ref().ok_or(CryptoError::NotAuthenticated)?;

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        keys.cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::TagMismatch)
    }

    /// Discard token and key. Idempotent.
    pub fn logout(&self) {
        if let Some(mut keys) = self.keys.write().take() {
            keys.zeroize();
            info!("Session keys discarded");
        } else {
            debug!("Logout with no active session");
        }
    }
}

impl fmt::Debug for SecuritySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecuritySession")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
