//! Sources for the symmetric key that encrypts the credential store.
//!
//! The store asks its `KeyProvider` for the key on every read or write and
//! drops it when that operation finishes; `StoreKey` zeroes itself on drop.

use std::fmt;
use std::path::PathBuf;

use argon2::Argon2;
use keyring::Entry;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

use super::CredentialError;

/// Key length for XChaCha20-Poly1305.
pub const KEY_LEN: usize = 32;

/// Salt length for passphrase derivation.
const SALT_LEN: usize = 16;

/// Keyring service name
const SERVICE_NAME: &str = "snipshare";

/// Keyring account under which the store key lives
const KEY_ACCOUNT: &str = "credential-store-key";

pub struct StoreKey([u8; KEY_LEN]);

impl StoreKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh key from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for StoreKey {
    fn drop(&mut self) {
        self.0.fill(0);
        std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreKey(<redacted>)")
    }
}

/// Capability that hands out the store key.
pub trait KeyProvider: Send + Sync {
    /// Fetch the key, creating and persisting it on first use.
    fn store_key(&self) -> Result<StoreKey, CredentialError>;
}

// ============================================================================
// Platform secure storage
// ============================================================================

/// Keeps the store key in the OS keychain (macOS Keychain, Windows Credential
/// Manager, Linux kernel keyutils).
#[derive(Debug, Clone)]
pub struct KeyringKeyProvider {
    service: String,
    account: String,
}

impl KeyringKeyProvider {
    pub fn new() -> Self {
        Self::with_names(SERVICE_NAME, KEY_ACCOUNT)
    }

    pub fn with_names(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry, CredentialError> {
        Entry::new(&self.service, &self.account)
            .map_err(|e| CredentialError::KeyUnavailable(format!("keyring entry: {}", e)))
    }
}

impl Default for KeyringKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for KeyringKeyProvider {
    fn store_key(&self) -> Result<StoreKey, CredentialError> {
        let entry = self.entry()?;
        match entry.get_secret() {
            Ok(mut secret) => {
                let result = <[u8; KEY_LEN]>::try_from(secret.as_slice())
                    .map(StoreKey::from_bytes)
                    .map_err(|_| {
                        CredentialError::KeyUnavailable(format!(
                            "keyring secret has {} bytes, expected {}",
                            secret.len(),
                            KEY_LEN
                        ))
                    });
                secret.iter_mut().for_each(|b| *b = 0);
                result
            }
            Err(keyring::Error::NoEntry) => {
                info!(service = %self.service, "Creating credential store key in keyring");
                let key = StoreKey::generate();
                entry.set_secret(key.as_bytes()).map_err(|e| {
                    CredentialError::KeyUnavailable(format!("failed to store key in keyring: {}", e))
                })?;
                Ok(key)
            }
            Err(e) => Err(CredentialError::KeyUnavailable(format!(
                "failed to read key from keyring: {}",
                e
            ))),
        }
    }
}

// ============================================================================
// In-memory (tests)
// ============================================================================

/// Holds a fixed key in memory. Intended for tests and ephemeral sessions.
pub struct MemoryKeyProvider {
    key: [u8; KEY_LEN],
}

impl MemoryKeyProvider {
    /// Random key, different on every construction.
    pub fn new() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }
}

impl Default for MemoryKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for MemoryKeyProvider {
    fn store_key(&self) -> Result<StoreKey, CredentialError> {
        Ok(StoreKey::from_bytes(self.key))
    }
}

// ============================================================================
// Passphrase (hosts without a keyring)
// ============================================================================

/// Derives the key with Argon2id from a passphrase and a random salt stored
/// next to the encrypted records.
pub struct PassphraseKeyProvider {
    passphrase: String,
    salt_path: PathBuf,
}

impl PassphraseKeyProvider {
    pub fn new(passphrase: impl Into<String>, salt_path: impl Into<PathBuf>) -> Self {
        Self {
            passphrase: passphrase.into(),
            salt_path: salt_path.into(),
        }
    }

    fn load_or_create_salt(&self) -> Result<Vec<u8>, CredentialError> {
        match std::fs::read(&self.salt_path) {
            Ok(salt) if salt.len() >= SALT_LEN => Ok(salt),
            Ok(salt) => Err(CredentialError::KeyUnavailable(format!(
                "salt file {} is truncated ({} bytes)",
                self.salt_path.display(),
                salt.len()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.salt_path.display(), "Creating passphrase salt");
                let mut salt = vec![0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                if let Some(parent) = self.salt_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&self.salt_path, &salt)?;
                Ok(salt)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for PassphraseKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassphraseKeyProvider")
            .field("salt_path", &self.salt_path)
            .finish_non_exhaustive()
    }
}

impl KeyProvider for PassphraseKeyProvider {
    fn store_key(&self) -> Result<StoreKey, CredentialError> {
        let salt = self.load_or_create_salt()?;
        let mut key = StoreKey::from_bytes([0u8; KEY_LEN]);
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), &salt, &mut key.0)
            .map_err(|e| CredentialError::KeyUnavailable(format!("key derivation failed: {}", e)))?;
        Ok(key)
    }
}
