use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the ledger and its backing store.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("shard does not exist: {0}")]
    NotFound(String),

    #[error("This shard already exists: {0}")]
    AlreadyExists(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A key read by the transaction was committed by someone else first.
    #[error("read conflict on key {key}: read version {read:?}, committed version {current:?}")]
    Conflict {
        key: String,
        read: Option<u64>,
        current: Option<u64>,
    },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LedgerError {
    /// `Incorrect number of arguments. Expecting N`
    pub fn arity(expected: usize) -> Self {
        LedgerError::InvalidArgument(format!(
            "Incorrect number of arguments. Expecting {}",
            expected
        ))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
