//! Shard pipeline core: splitting and merging CRP streams, deriving the
//! tamper-evident `ShardId` / `DataId` pair, and running the per-index
//! derivation batch that feeds the provenance ledger.

pub mod config;
pub mod error;
pub mod fsio;
pub mod identity;
pub mod naming;
pub mod pipeline;
pub mod splitter;

pub use config::Settings;
pub use error::{CoreError, CoreResult};
pub use identity::{compute_data_id, compute_shard_id, DataId, Digest256, ShardId, ShardIdentity, Verification};
pub use naming::{decompose, ShardName, Sidecar};
pub use pipeline::{BatchReport, DerivationJob, IndexOutcome, ShardArtifacts};
pub use splitter::{merge, split, CrpKind, DirShardSource, RecordLayout, Shard, ShardSource};
