use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the symmetric and envelope stages.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key material not found at {path}: {source}")]
    KeyNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write key material to {path}: {source}")]
    KeyWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
