//! Shard and sidecar file naming.
//!
//! Every artifact derived from a source file `dir/basename.suffix` is named
//! by index:
//!
//! - shard:         `basename-index.suffix`
//! - shard id:      `basename-index-ShardId.suffix`
//! - data id:       `basename-index-DataId.suffix`
//! - sealed CRPs:   `basename-index-cipherCRPs.suffix`
//! - merged stream: `merge-basename.suffix`

use crate::error::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

/// Tag appended to a shard name for derived artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sidecar {
    ShardId,
    DataId,
    CipherCrps,
}

impl Sidecar {
    pub fn tag(&self) -> &'static str {
        match self {
            Sidecar::ShardId => "ShardId",
            Sidecar::DataId => "DataId",
            Sidecar::CipherCrps => "cipherCRPs",
        }
    }
}

/// A source path decomposed into directory, basename and suffix.
///
/// The suffix keeps its leading dot (`.bin`) and is empty when the file has
/// no extension. Only the last extension counts: `a.tar.gz` has basename
/// `a.tar`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardName {
    pub dir: PathBuf,
    pub basename: String,
    pub suffix: String,
}

impl ShardName {
    pub fn new(dir: impl Into<PathBuf>, basename: impl Into<String>, suffix: impl Into<String>) -> Self {
        ShardName {
            dir: dir.into(),
            basename: basename.into(),
            suffix: suffix.into(),
        }
    }

    /// Decompose `path` into (dir, basename, suffix).
    pub fn parse(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let basename = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CoreError::InvalidArgument(format!("{} has no usable file name", path.display()))
            })?;
        let suffix = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(ShardName::new(dir, basename, suffix))
    }

    pub fn with_dir(&self, dir: impl Into<PathBuf>) -> Self {
        ShardName {
            dir: dir.into(),
            ..self.clone()
        }
    }

    pub fn with_suffix(&self, suffix: impl Into<String>) -> Self {
        ShardName {
            suffix: suffix.into(),
            ..self.clone()
        }
    }

    /// `basename-index.suffix`
    pub fn file_name(&self, index: u32) -> String {
        format!("{}-{}{}", self.basename, index, self.suffix)
    }

    pub fn shard_path(&self, index: u32) -> PathBuf {
        self.dir.join(self.file_name(index))
    }

    /// `basename-index-<tag>.suffix`
    pub fn sidecar_path(&self, index: u32, sidecar: Sidecar) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{}{}",
            self.basename,
            index,
            sidecar.tag(),
            self.suffix
        ))
    }

    /// `out_dir/merge-basename.suffix`
    pub fn merged_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("merge-{}{}", self.basename, self.suffix))
    }

    /// The original file name with a prefix, e.g. `cipher-8.txt`.
    pub fn prefixed_path(&self, out_dir: &Path, prefix: &str) -> PathBuf {
        out_dir.join(format!("{}{}{}", prefix, self.basename, self.suffix))
    }
}

/// Split `path` into (dir, basename, suffix), e.g.
/// `Response/response_128.bin` -> (`Response`, `response_128`, `.bin`).
pub fn decompose(path: impl AsRef<Path>) -> CoreResult<(PathBuf, String, String)> {
    let name = ShardName::parse(path)?;
    Ok((name.dir, name.basename, name.suffix))
}
