use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use super::keys::KeyProvider;
use super::session::{AuthState, Credential};
use super::vault::Vault;
use super::CredentialError;
use crate::models::{PasswordReset, User};

/// Record holding the current credential
const CREDENTIAL_RECORD: &str = "auth_credential";

/// Record holding pending password-reset state
const PASSWORD_RESET_RECORD: &str = "password_reset";

/// Encrypted, file-backed store for the session credential.
///
/// Access is serialized in-process with a single-writer/multi-reader lock;
/// on disk every write is an atomic rename. A record that cannot be
/// decrypted (corruption, rotated key) reads as absent.
pub struct CredentialStore {
    vault: Vault,
    lock: RwLock<()>,
    state: watch::Sender<AuthState>,
}

impl CredentialStore {
    /// Open (or prepare) a store in `dir`, using `keys` for encryption.
    pub fn open(dir: impl Into<PathBuf>, keys: Arc<dyn KeyProvider>) -> Result<Self, CredentialError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let (state, _) = watch::channel(AuthState::SignedOut);
        let store = Self {
            vault: Vault::new(dir, keys),
            lock: RwLock::new(()),
            state,
        };

        let initial = match store.load() {
            Ok(Some(credential)) => AuthState::SignedIn {
                user: credential.user,
            },
            Ok(None) => AuthState::SignedOut,
            Err(e) => {
                warn!(error = %e, "Could not read stored credential, starting signed out");
                AuthState::SignedOut
            }
        };
        store.state.send_replace(initial);
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        self.vault.dir()
    }

    // ===== Credential =====

    pub fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let plaintext = serde_json::to_vec(credential)?;
        let _guard = self.lock.write().map_err(|_| CredentialError::Poisoned)?;
        self.vault.write(CREDENTIAL_RECORD, &plaintext)?;
        // Published under the write guard so subscribers never lag the disk.
        self.state.send_replace(AuthState::SignedIn {
            user: credential.user.clone(),
        });
        info!(
            user = credential.user.as_ref().map(|u| u.username.as_str()),
            "Stored credential"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Option<Credential>, CredentialError> {
        self.read_record(CREDENTIAL_RECORD)
    }

    pub fn clear(&self) -> Result<(), CredentialError> {
        let _guard = self.lock.write().map_err(|_| CredentialError::Poisoned)?;
        self.vault.remove(CREDENTIAL_RECORD)?;
        self.state.send_replace(AuthState::SignedOut);
        info!("Cleared stored credential");
        Ok(())
    }

    /// Clear the credential only if it still carries `token`.
    /// Returns false when a different (newer) credential, or none, is stored.
    pub fn clear_if_token(&self, token: &str) -> Result<bool, CredentialError> {
        let _guard = self.lock.write().map_err(|_| CredentialError::Poisoned)?;
        let current = self.read_unlocked::<Credential>(CREDENTIAL_RECORD)?;
        if !current.is_some_and(|c| c.token == token) {
            return Ok(false);
        }
        self.vault.remove(CREDENTIAL_RECORD)?;
        self.state.send_replace(AuthState::SignedOut);
        info!("Cleared stored credential");
        Ok(true)
    }

    /// Replace the user attached to the stored credential.
    /// Returns false when no credential is stored.
    pub fn update_user(&self, user: User) -> Result<bool, CredentialError> {
        let _guard = self.lock.write().map_err(|_| CredentialError::Poisoned)?;
        let Some(mut credential) = self.read_unlocked::<Credential>(CREDENTIAL_RECORD)? else {
            return Ok(false);
        };
        credential.user = Some(user);
        self.vault
            .write(CREDENTIAL_RECORD, &serde_json::to_vec(&credential)?)?;
        self.state.send_replace(AuthState::SignedIn { user: credential.user });
        Ok(true)
    }

    pub fn is_signed_in(&self) -> bool {
        self.state.borrow().is_signed_in()
    }

    // ===== Password reset =====

    pub fn save_password_reset(&self, reset: &PasswordReset) -> Result<(), CredentialError> {
        self.write_record(PASSWORD_RESET_RECORD, reset)
    }

    pub fn load_password_reset(&self) -> Result<Option<PasswordReset>, CredentialError> {
        self.read_record(PASSWORD_RESET_RECORD)
    }

    pub fn clear_password_reset(&self) -> Result<(), CredentialError> {
        let _guard = self.lock.write().map_err(|_| CredentialError::Poisoned)?;
        self.vault.remove(PASSWORD_RESET_RECORD)
    }

    /// Remove every record.
    pub fn clear_all(&self) -> Result<(), CredentialError> {
        self.clear_password_reset()?;
        self.clear()
    }

    // ===== Observation =====

    /// Receiver that sees every sign-in/sign-out transition.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    // ===== Internals =====

    fn write_record<T: Serialize>(&self, id: &str, value: &T) -> Result<(), CredentialError> {
        let plaintext = serde_json::to_vec(value)?;
        let _guard = self.lock.write().map_err(|_| CredentialError::Poisoned)?;
        self.vault.write(id, &plaintext)
    }

    fn read_record<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, CredentialError> {
        let _guard = self.lock.read().map_err(|_| CredentialError::Poisoned)?;
        self.read_unlocked(id)
    }

    fn read_unlocked<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, CredentialError> {
        let plaintext = match self.vault.read(id) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(CredentialError::Decrypt(record)) => {
                warn!(record = %record, "Stored record could not be decrypted, treating as absent");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        match serde_json::from_slice(&plaintext) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(record = id, error = %e, "Stored record is malformed, treating as absent");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("dir", &self.vault.dir())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryKeyProvider;
    use chrono::{Duration, Utc};

    fn open_store(dir: &Path) -> CredentialStore {
        CredentialStore::open(dir, Arc::new(MemoryKeyProvider::from_bytes([7u8; 32]))).unwrap()
    }

    fn sample_user() -> User {
        User {
            id: "1".to_string(),
            username: "ada".to_string(),
            email: "ada@example.test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let credential = Credential::new("abc123")
            .with_user(sample_user())
            .with_ttl(Duration::hours(1));

        store.save(&credential).unwrap();
        assert_eq!(store.load().unwrap(), Some(credential));
    }

    #[test]
    fn test_clear_then_load_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        // From empty
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());

        // From populated
        store.save(&Credential::new("abc123")).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_reopen_sees_saved_credential() {
        let dir = tempfile::tempdir().unwrap();
        open_store(dir.path()).save(&Credential::new("persisted")).unwrap();

        let reopened = open_store(dir.path());
        assert_eq!(reopened.load().unwrap().map(|c| c.token), Some("persisted".to_string()));
        assert!(reopened.is_signed_in());
    }

    #[test]
    fn test_rotated_key_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        open_store(dir.path()).save(&Credential::new("abc123")).unwrap();

        let rotated =
            CredentialStore::open(dir.path(), Arc::new(MemoryKeyProvider::from_bytes([9u8; 32]))).unwrap();
        assert!(rotated.load().unwrap().is_none());
        assert_eq!(rotated.state(), AuthState::SignedOut);
    }

    #[test]
    fn test_corrupted_record_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.save(&Credential::new("abc123")).unwrap();

        std::fs::write(dir.path().join("auth_credential.enc"), b"garbage").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_update_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(!store.update_user(sample_user()).unwrap());

        store.save(&Credential::new("abc123")).unwrap();
        assert!(store.update_user(sample_user()).unwrap());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token, "abc123");
        assert_eq!(loaded.user, Some(sample_user()));
        assert_eq!(store.state(), AuthState::SignedIn { user: Some(sample_user()) });
    }

    #[test]
    fn test_password_reset_is_separate_from_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let reset = PasswordReset {
            email: "ada@example.test".to_string(),
            token: "reset-1".to_string(),
        };

        store.save(&Credential::new("abc123")).unwrap();
        store.save_password_reset(&reset).unwrap();
        store.clear().unwrap();
        assert_eq!(store.load_password_reset().unwrap(), Some(reset));

        store.clear_all().unwrap();
        assert!(store.load_password_reset().unwrap().is_none());
    }

    #[test]
    fn test_subscribers_see_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut rx = store.subscribe();
        assert_eq!(*rx.borrow_and_update(), AuthState::SignedOut);

        store.save(&Credential::new("abc123").with_user(sample_user())).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            *rx.borrow_and_update(),
            AuthState::SignedIn { user: Some(sample_user()) }
        );

        store.clear().unwrap();
        assert_eq!(*rx.borrow_and_update(), AuthState::SignedOut);
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(dir.path()));
        store.save(&Credential::new("token-0")).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 1..50 {
                    store.save(&Credential::new(format!("token-{}", i))).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let loaded = store.load().unwrap().expect("credential disappeared mid-write");
                        assert!(loaded.token.starts_with("token-"));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.load().unwrap().map(|c| c.token), Some("token-49".to_string()));
    }

    #[test]
    fn test_clear_if_token_keeps_newer_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        assert!(!store.clear_if_token("old-token").unwrap());

        store.save(&Credential::new("fresh-token")).unwrap();
        assert!(!store.clear_if_token("old-token").unwrap());
        assert_eq!(store.load().unwrap().map(|c| c.token), Some("fresh-token".to_string()));
        assert!(store.is_signed_in());

        assert!(store.clear_if_token("fresh-token").unwrap());
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.state(), AuthState::SignedOut);
    }

    #[test]
    fn test_published_state_matches_disk_under_contention() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(dir.path()));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        if (worker + i) % 2 == 0 {
                            store.save(&Credential::new(format!("token-{}-{}", worker, i))).unwrap();
                        } else {
                            store.clear().unwrap();
                        }
                    }
                })
            })
            .collect();

        // While writers run, a consistent snapshot is one taken between writes.
        for _ in 0..50 {
            let _guard = store.lock.read().unwrap();
            let on_disk = store.read_unlocked::<Credential>(CREDENTIAL_RECORD).unwrap();
            assert_eq!(store.state().is_signed_in(), on_disk.is_some());
        }

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(store.is_signed_in(), store.load().unwrap().is_some());
    }

    #[test]
    fn test_expired_credential_still_loads() {
        // Expiry is enforced by the API client, the store only persists.
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let expired = Credential::new("old").with_expiry(Utc::now() - Duration::minutes(5));
        store.save(&expired).unwrap();
        assert!(store.load().unwrap().unwrap().is_expired());
    }
}
