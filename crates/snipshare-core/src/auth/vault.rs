//! Encrypted record files.
//!
//! Each record lives in `<dir>/<id>.enc` as
//! `version (1 byte) || nonce (24 bytes) || XChaCha20-Poly1305 ciphertext`,
//! with the record id bound as associated data so records cannot be swapped.
//! Writes go to a temporary file that is renamed over the record, so readers
//! see either the old or the new record, never a partial one.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use tracing::debug;

use super::keys::KeyProvider;
use super::CredentialError;

const FORMAT_VERSION: u8 = 1;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const RECORD_EXTENSION: &str = "enc";

pub(crate) struct Vault {
    dir: PathBuf,
    keys: Arc<dyn KeyProvider>,
}

impl Vault {
    pub fn new(dir: PathBuf, keys: Arc<dyn KeyProvider>) -> Self {
        Self { dir, keys }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    pub fn write(&self, id: &str, plaintext: &[u8]) -> Result<(), CredentialError> {
        let sealed = {
            let key = self.keys.store_key()?;
            let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
            let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
            let ciphertext = cipher
                .encrypt(
                    &nonce,
                    Payload {
                        msg: plaintext,
                        aad: id.as_bytes(),
                    },
                )
                .map_err(|_| CredentialError::Encrypt)?;

            let mut sealed = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
            sealed.push(FORMAT_VERSION);
            sealed.extend_from_slice(nonce.as_slice());
            sealed.extend_from_slice(&ciphertext);
            sealed
        };

        fs::create_dir_all(&self.dir)?;
        let path = self.record_path(id);
        let tmp_path = self
            .dir
            .join(format!(".{}.{}.{}.tmp", id, std::process::id(), RECORD_EXTENSION));

        let mut file = open_private(&tmp_path)?;
        file.write_all(&sealed)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        debug!(record = id, bytes = sealed.len(), "Wrote encrypted record");
        Ok(())
    }

    /// Returns `Ok(None)` when the record does not exist and
    /// `Err(CredentialError::Decrypt)` when it exists but cannot be opened.
    pub fn read(&self, id: &str) -> Result<Option<Vec<u8>>, CredentialError> {
        let sealed = match fs::read(self.record_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if sealed.len() < 1 + NONCE_LEN + TAG_LEN || sealed[0] != FORMAT_VERSION {
            return Err(CredentialError::Decrypt(id.to_string()));
        }
        let (nonce, ciphertext) = sealed[1..].split_at(NONCE_LEN);

        let key = self.keys.store_key()?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: id.as_bytes(),
                },
            )
            .map_err(|_| CredentialError::Decrypt(id.to_string()))?;
        Ok(Some(plaintext))
    }

    pub fn remove(&self, id: &str) -> Result<(), CredentialError> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryKeyProvider;

    fn vault(dir: &Path) -> Vault {
        Vault::new(dir.to_path_buf(), Arc::new(MemoryKeyProvider::new()))
    }

    #[test]
    fn test_missing_record_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(vault(dir.path()).read("nothing").unwrap().is_none());
    }

    #[test]
    fn test_record_is_not_plaintext_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(dir.path());
        v.write("rec", b"super-secret-token").unwrap();

        let raw = fs::read(v.record_path("rec")).unwrap();
        assert!(!raw.windows(b"super-secret-token".len()).any(|w| w == b"super-secret-token"));
        assert_eq!(v.read("rec").unwrap().as_deref(), Some(&b"super-secret-token"[..]));
    }

    #[test]
    fn test_swapped_record_fails_to_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(dir.path());
        v.write("a", b"alpha").unwrap();
        fs::copy(v.record_path("a"), v.record_path("b")).unwrap();

        assert!(matches!(v.read("b"), Err(CredentialError::Decrypt(_))));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(dir.path());
        v.write("rec", b"x").unwrap();
        v.remove("rec").unwrap();
        v.remove("rec").unwrap();
        assert!(v.read("rec").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_record_permissions_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let v = vault(dir.path());
        v.write("rec", b"x").unwrap();
        let mode = fs::metadata(v.record_path("rec")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
