// Per-index derivation batch
//
// For each shard index x in 0..count:
//   shard(x)                      -> ShardId          -> basename-x-ShardId.suffix
//   AES(response(x), key(x))      -> cipher-response
//   (challenge(x), cipher, ShardId) -> DataId         -> basename-x-DataId.suffix
//   seal(challenge || cipher, receiver(x))            -> receiver-x-cipherCRPs.suffix
//
// SAFETY INVARIANTS:
// 1. Indices share no state; each runs as its own task
// 2. A failure (missing key, unreadable shard, bad certificate) abandons
//    only that index; the report carries one result per index
// 3. Plaintext responses are never written to disk
// 4. An abandoned index leaves no sidecar or envelope behind

use crate::error::{CoreError, CoreResult};
use crate::fsio::{read_file, write_file};
use crate::identity::{compute_data_id, compute_shard_id, write_sidecar, ShardIdentity};
use crate::naming::{ShardName, Sidecar};
use log::{info, warn};
use pufvault_crypto::{
    open_crp, seal_crp, symmetric, CrpEnvelope, ReceiverPublicKey, ReceiverSecretKey,
    SealedEnvelope, SymmetricKey,
};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Inputs for one derivation batch. Every template names files as
/// `dir/basename-index.suffix`.
#[derive(Debug, Clone)]
pub struct DerivationJob {
    /// Origin (IP) address bound into every ShardId.
    pub origin: String,
    /// Number of indices to process, starting at 0.
    pub count: u32,
    pub shards: ShardName,
    pub challenges: ShardName,
    pub responses: ShardName,
    pub keys: ShardName,
    pub receivers: ShardName,
    /// Where sidecars and envelopes go. Defaults to the shard directory.
    pub out_dir: Option<PathBuf>,
}

/// Everything produced for one index.
#[derive(Debug, Clone, Serialize)]
pub struct ShardArtifacts {
    pub index: u32,
    pub identity: ShardIdentity,
    pub shard_id_path: PathBuf,
    pub data_id_path: PathBuf,
    pub envelope_path: PathBuf,
}

#[derive(Debug)]
pub struct IndexOutcome {
    pub index: u32,
    pub result: CoreResult<ShardArtifacts>,
}

/// One outcome per index, in index order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<IndexOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &ShardArtifacts> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (u32, &CoreError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.index, e)))
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

impl DerivationJob {
    fn output_dir(&self) -> &Path {
        self.out_dir.as_deref().unwrap_or(&self.shards.dir)
    }

    pub fn envelope_path(&self, index: u32) -> PathBuf {
        self.receivers
            .with_dir(self.output_dir())
            .with_suffix(self.challenges.suffix.clone())
            .sidecar_path(index, Sidecar::CipherCrps)
    }

    /// Run every index on the current rayon pool.
    pub fn run(&self) -> BatchReport {
        info!(
            "deriving identities for {} shard(s) of {} from origin {}",
            self.count, self.shards.basename, self.origin
        );
        let outcomes: Vec<IndexOutcome> = (0..self.count)
            .into_par_iter()
            .map(|index| {
                let result = self.process_index(index);
                if let Err(e) = &result {
                    warn!("shard index {} abandoned: {}", index, e);
                }
                IndexOutcome { index, result }
            })
            .collect();

        let report = BatchReport { outcomes };
        info!(
            "batch finished: {} ok, {} failed",
            report.succeeded().count(),
            report.failed().count()
        );
        report
    }

    /// Run on a dedicated pool of `jobs` threads (0 picks rayon's default).
    pub fn run_with_jobs(&self, jobs: usize) -> CoreResult<BatchReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|e| CoreError::InvalidConfig(format!("thread pool: {}", e)))?;
        Ok(pool.install(|| self.run()))
    }

    /// Process a single index end to end. Nothing is written until every
    /// input has loaded and the envelope is sealed.
    pub fn process_index(&self, index: u32) -> CoreResult<ShardArtifacts> {
        let out = self.shards.with_dir(self.output_dir());

        let shard = read_file(&self.shards.shard_path(index))?;
        let shard_id = compute_shard_id(&self.origin, index, &shard);

        let challenge = read_file(&self.challenges.shard_path(index))?;
        let response = read_file(&self.responses.shard_path(index))?;
        let key = SymmetricKey::load(&self.keys.shard_path(index))?;
        let cipher_response = symmetric::encrypt(&response, &key)?;
        drop(response);

        let data_id = compute_data_id(&challenge, &cipher_response, &shard_id);
        let receiver = ReceiverPublicKey::load(&self.receivers.shard_path(index))?;
        let sealed = seal_crp(&CrpEnvelope::new(challenge, cipher_response), &receiver)?;

        let shard_id_path = out.sidecar_path(index, Sidecar::ShardId);
        write_sidecar(&shard_id_path, shard_id.digest())?;
        let data_id_path = out.sidecar_path(index, Sidecar::DataId);
        write_sidecar(&data_id_path, data_id.digest())?;
        let envelope_path = self.envelope_path(index);
        write_file(&envelope_path, sealed.as_bytes())?;

        Ok(ShardArtifacts {
            index,
            identity: ShardIdentity { shard_id, data_id },
            shard_id_path,
            data_id_path,
            envelope_path,
        })
    }
}

/// Receiver side: open a `cipherCRPs` file and, given the shard key,
/// recover the plaintext response.
pub fn open_envelope_file(
    path: &Path,
    secret: &ReceiverSecretKey,
    shard_key: Option<&SymmetricKey>,
) -> CoreResult<(CrpEnvelope, Option<Vec<u8>>)> {
    let sealed = SealedEnvelope::from_bytes(read_file(path)?)?;
    let envelope = open_crp(&sealed, secret)?;
    let response = match shard_key {
        Some(key) => Some(symmetric::decrypt(&envelope.cipher_response, key)?),
        None => None,
    };
    Ok((envelope, response))
}
