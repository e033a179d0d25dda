//! Whole-file reads and writes with path-carrying errors.

use crate::error::{CoreError, CoreResult};
use std::fs;
use std::path::Path;

pub fn read_file(path: &Path) -> CoreResult<Vec<u8>> {
    fs::read(path).map_err(|e| CoreError::io(path, e))
}

/// Write `bytes` to `path`, creating parent directories first.
pub fn write_file(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
        }
    }
    fs::write(path, bytes).map_err(|e| CoreError::io(path, e))
}
