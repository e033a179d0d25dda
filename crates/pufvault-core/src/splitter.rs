// Splitter/Merger - deterministic chunking of CRP streams
//
// SAFETY INVARIANTS:
// 1. Every shard holds exactly `chunk_size` bytes except the last, which
//    holds the remainder; a zero remainder yields no trailing shard
// 2. Shard indices are contiguous from 0
// 3. Merge reads indices 0, 1, 2, ... and stops at the first absent index;
//    an interior gap silently truncates the result
// 4. merge(split(s, k)) == s for every non-empty s and k > 0

use crate::error::{CoreError, CoreResult};
use crate::fsio::{read_file, write_file};
use crate::identity::{compute_shard_id, ShardId};
use crate::naming::ShardName;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Which half of a CRP set a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrpKind {
    Challenge,
    Response,
}

impl CrpKind {
    /// Challenge files carry `challenge` in their name; anything else is
    /// treated as a response file.
    pub fn infer(name: &ShardName) -> Self {
        if name.basename.to_ascii_lowercase().contains("challenge") {
            CrpKind::Challenge
        } else {
            CrpKind::Response
        }
    }
}

/// Declared record geometry of a CRP file.
///
/// One response record is the concatenation of `instances` per-PUF
/// responses; a challenge record is shared by every instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLayout {
    pub bit_length: u64,
    pub bytes_per_unit: u64,
    pub instances: u64,
}

impl RecordLayout {
    pub fn new(bit_length: u64, bytes_per_unit: u64, instances: u64) -> Self {
        RecordLayout {
            bit_length,
            bytes_per_unit,
            instances,
        }
    }

    /// Bytes per shard for `kind`.
    ///
    /// - response:  bit_length * bytes_per_unit * instances
    /// - challenge: bit_length * bytes_per_unit
    pub fn chunk_size(&self, kind: CrpKind) -> CoreResult<usize> {
        if self.bit_length == 0 || self.bytes_per_unit == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "bit length ({}) and bytes per unit ({}) must be > 0",
                self.bit_length, self.bytes_per_unit
            )));
        }
        let base = self.bit_length.checked_mul(self.bytes_per_unit);
        let size = match kind {
            CrpKind::Challenge => base,
            CrpKind::Response => {
                if self.instances == 0 {
                    return Err(CoreError::InvalidConfig(
                        "instance count must be > 0 for response data".to_string(),
                    ));
                }
                base.and_then(|b| b.checked_mul(self.instances))
            }
        };
        size.and_then(|s| usize::try_from(s).ok())
            .ok_or_else(|| CoreError::InvalidConfig("chunk size overflows usize".to_string()))
    }
}

/// One contiguous, index-tagged slice of a CRP stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub index: u32,
    pub origin: String,
    pub data: Vec<u8>,
}

impl Shard {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shard_id(&self) -> ShardId {
        compute_shard_id(&self.origin, self.index, &self.data)
    }
}

fn check_chunk_size(chunk_size: usize) -> CoreResult<()> {
    if chunk_size == 0 {
        return Err(CoreError::InvalidConfig("chunk size must be > 0".to_string()));
    }
    Ok(())
}

fn next_index(count: usize) -> CoreResult<u32> {
    u32::try_from(count)
        .map_err(|_| CoreError::InvalidConfig("shard count exceeds u32::MAX".to_string()))
}

/// Split an in-memory stream into ordered shards.
pub fn split(data: &[u8], chunk_size: usize, origin: &str) -> CoreResult<Vec<Shard>> {
    check_chunk_size(chunk_size)?;
    if data.is_empty() {
        return Err(CoreError::EmptyInput("source stream is empty".to_string()));
    }

    data.chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| {
            Ok(Shard {
                index: next_index(i)?,
                origin: origin.to_string(),
                data: chunk.to_vec(),
            })
        })
        .collect()
}

/// Stream `reader` in `chunk_size` pieces, handing each to `sink` with its
/// index. Returns the number of shards produced.
pub fn split_reader<R, F>(mut reader: R, chunk_size: usize, mut sink: F) -> CoreResult<u32>
where
    R: Read,
    F: FnMut(u32, &[u8]) -> CoreResult<()>,
{
    check_chunk_size(chunk_size)?;
    let mut count = 0u32;
    loop {
        let mut buf = Vec::with_capacity(chunk_size);
        let read = Read::by_ref(&mut reader)
            .take(chunk_size as u64)
            .read_to_end(&mut buf)
            .map_err(|e| CoreError::Io {
                path: PathBuf::from("<stream>"),
                source: e,
            })?;
        if read == 0 {
            break;
        }
        sink(count, &buf)?;
        count = count
            .checked_add(1)
            .ok_or_else(|| CoreError::InvalidConfig("shard count exceeds u32::MAX".to_string()))?;
    }
    if count == 0 {
        return Err(CoreError::EmptyInput("source stream is empty".to_string()));
    }
    Ok(count)
}

/// Split `source` into `out_dir/basename-index.suffix` files.
pub fn split_file(source: &Path, chunk_size: usize, out_dir: &Path) -> CoreResult<Vec<PathBuf>> {
    check_chunk_size(chunk_size)?;
    let name = ShardName::parse(source)?.with_dir(out_dir);
    let file = File::open(source).map_err(|e| CoreError::io(source, e))?;

    info!("shard size: {} bytes, source: {}", chunk_size, source.display());
    let mut written = Vec::new();
    split_reader(BufReader::new(file), chunk_size, |index, chunk| {
        let path = name.shard_path(index);
        write_file(&path, chunk)?;
        info!("create shard: {}", path.display());
        written.push(path);
        Ok(())
    })
    .map_err(|e| match e {
        CoreError::EmptyInput(_) => {
            CoreError::EmptyInput(format!("{} is empty", source.display()))
        }
        other => other,
    })?;
    Ok(written)
}

// ==================== MERGE ====================

/// Anything that can hand back shard bytes by index.
pub trait ShardSource {
    /// `Ok(None)` when the index is absent.
    fn read_shard(&self, index: u32) -> CoreResult<Option<Vec<u8>>>;
}

/// Shards stored as `dir/basename-index.suffix` files.
#[derive(Debug, Clone)]
pub struct DirShardSource {
    name: ShardName,
}

impl DirShardSource {
    pub fn new(name: ShardName) -> Self {
        DirShardSource { name }
    }

    pub fn name(&self) -> &ShardName {
        &self.name
    }
}

impl ShardSource for DirShardSource {
    fn read_shard(&self, index: u32) -> CoreResult<Option<Vec<u8>>> {
        match read_file(&self.name.shard_path(index)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(CoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl ShardSource for BTreeMap<u32, Vec<u8>> {
    fn read_shard(&self, index: u32) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.get(&index).cloned())
    }
}

impl ShardSource for [Shard] {
    fn read_shard(&self, index: u32) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.iter().find(|s| s.index == index).map(|s| s.data.clone()))
    }
}

/// Concatenate shards 0, 1, 2, ... until the first missing index.
///
/// A missing index is the end of the sequence, not an error: `{0, 1, 3}`
/// merges to shards 0 and 1 and shard 3 is never read.
pub fn merge<S: ShardSource + ?Sized>(source: &S) -> CoreResult<Vec<u8>> {
    let mut merged = Vec::new();
    let mut index = 0u32;
    while let Some(bytes) = source.read_shard(index)? {
        debug!("merging shard {} ({} bytes)", index, bytes.len());
        merged.extend_from_slice(&bytes);
        index = match index.checked_add(1) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(merged)
}

/// Merge the shards named by `name` into `out_dir/merge-basename.suffix`.
/// Returns the output path and the number of bytes written.
pub fn merge_to_file(name: &ShardName, out_dir: &Path) -> CoreResult<(PathBuf, usize)> {
    let merged = merge(&DirShardSource::new(name.clone()))?;
    if merged.is_empty() {
        return Err(CoreError::NotFound(name.shard_path(0)));
    }
    let out = name.merged_path(out_dir);
    write_file(&out, &merged)?;
    info!("merged {} bytes into {}", merged.len(), out.display());
    Ok((out, merged.len()))
}
