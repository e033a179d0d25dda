use pufvault_crypto::CryptoError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O failure on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl CoreError {
    /// Map an IO error on `path`, keeping "missing file" distinct from
    /// other read/write failures.
    pub fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            CoreError::NotFound(path.to_path_buf())
        } else {
            CoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// True when the failure is missing key or certificate material.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, CoreError::Crypto(CryptoError::KeyNotFound { .. }))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
