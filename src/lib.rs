//! PUFVAULT: sharded custody of PUF challenge/response (CRP) data.
//!
//! - [`shards`]: splitting and merging CRP streams, `ShardId` / `DataId`
//!   derivation and the per-index derivation batch
//! - [`crypto`]: AES-128-CBC shard encryption and receiver-sealed envelopes
//! - [`ledger`]: the provenance ledger recording every shard and its custodian

pub use pufvault_core as shards;
pub use pufvault_crypto as crypto;
pub use pufvault_state as ledger;

pub use pufvault_core::{compute_data_id, compute_shard_id, DataId, DerivationJob, ShardId, ShardIdentity, ShardName};
pub use pufvault_state::{MemoryStore, ShardLedger};

/// Ledger outcome for one derived shard.
#[derive(Debug)]
pub struct RegistrationOutcome {
    pub index: u32,
    /// The registered ShardId, or why the ledger refused it.
    pub result: pufvault_state::LedgerResult<String>,
}

/// One outcome per successfully derived shard, in index order.
#[derive(Debug, Default)]
pub struct RegistrationReport {
    pub outcomes: Vec<RegistrationOutcome>,
}

impl RegistrationReport {
    pub fn registered(&self) -> impl Iterator<Item = (u32, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|id| (o.index, id.as_str())))
    }

    pub fn failed(&self) -> impl Iterator<Item = (u32, &pufvault_state::LedgerError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.index, e)))
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Register every successfully derived shard of `report` on `ledger`.
///
/// Each shard commits in its own transaction; a refused shard is recorded
/// and the walk continues with the next index.
pub fn register_batch<S: pufvault_state::StateStore>(
    ledger: &ShardLedger<S>,
    report: &pufvault_core::BatchReport,
    sender: &str,
    receiver: &str,
    threshold: u32,
    puf_num: u32,
) -> RegistrationReport {
    let (threshold, puf_num) = (threshold.to_string(), puf_num.to_string());
    let outcomes: Vec<RegistrationOutcome> = report
        .succeeded()
        .map(|artifacts| {
            let shard_id = artifacts.identity.shard_id.to_hex();
            let data_id = artifacts.identity.data_id.to_hex();
            let result = ledger
                .add_shard(&pufvault_state::ShardRegistration {
                    sender,
                    shard_id: &shard_id,
                    data_id: &data_id,
                    receiver,
                    threshold: &threshold,
                    puf_num: &puf_num,
                    success_num: "0",
                })
                .map(|_| shard_id);
            match &result {
                Ok(id) => log::info!("registered shard {} (index {})", id, artifacts.index),
                Err(e) => log::warn!("shard index {} not registered: {}", artifacts.index, e),
            }
            RegistrationOutcome {
                index: artifacts.index,
                result,
            }
        })
        .collect();

    let registration = RegistrationReport { outcomes };
    log::info!(
        "registration finished: {} ok, {} failed",
        registration.registered().count(),
        registration.failed().count()
    );
    registration
}
