//! Authentication state and encrypted credential storage.
//!
//! This module provides:
//! - `Credential`: The bearer token with issue/expiry metadata
//! - `CredentialStore`: Encrypted on-disk storage with observable `AuthState`
//! - `KeyProvider`: Where the encryption key comes from (OS keyring,
//!   passphrase, or memory for tests)

pub mod credentials;
pub mod error;
pub mod keys;
pub mod session;
mod vault;

pub use credentials::CredentialStore;
pub use error::CredentialError;
pub use keys::{KeyProvider, KeyringKeyProvider, MemoryKeyProvider, PassphraseKeyProvider, StoreKey};
pub use session::{AuthState, Credential};
