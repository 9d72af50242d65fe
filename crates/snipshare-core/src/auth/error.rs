use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Failed to encrypt credential record")]
    Encrypt,

    #[error("Failed to decrypt credential record '{0}'")]
    Decrypt(String),

    #[error("Credential record is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Credential store lock poisoned")]
    Poisoned,
}
