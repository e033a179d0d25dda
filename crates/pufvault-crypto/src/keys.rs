//! Key file IO shared by the symmetric and envelope stages.
//!
//! Key files are small and read whole. A file that cannot be opened is
//! reported as `KeyNotFound` with its path so batch callers can abandon the
//! affected shard index and move on.

use crate::error::{CryptoError, CryptoResult};
use log::debug;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

/// Read a key or certificate file into a zeroizing buffer.
pub fn read_key_file(path: &Path) -> CryptoResult<Zeroizing<Vec<u8>>> {
    debug!("reading key material from {}", path.display());
    fs::read(path)
        .map(Zeroizing::new)
        .map_err(|source| CryptoError::KeyNotFound {
            path: path.to_path_buf(),
            source,
        })
}

/// Write key material, creating parent directories as needed.
pub fn write_key_file(path: &Path, bytes: &[u8]) -> CryptoResult<()> {
    let wrap = |source| CryptoError::KeyWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(wrap)?;
        }
    }
    fs::write(path, bytes).map_err(wrap)
}
