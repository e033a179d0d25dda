//! Provenance ledger for PUF CRP shards.
//!
//! A versioned key/value store (`StateReader` / `StateStore`), a transaction
//! simulator with read-set validation, a Mango-style selector engine and the
//! shard chaincode built on top of them.

pub mod asset;
pub mod composite;
pub mod error;
pub mod memory_store;
pub mod selector;
pub mod shard_ledger;
pub mod store;
pub mod tx_context;

pub use asset::{ShardAsset, SHARD_DOC_TYPE};
pub use composite::{create_composite_key, split_composite_key};
pub use error::{LedgerError, LedgerResult};
pub use memory_store::MemoryStore;
pub use selector::Query;
pub use shard_ledger::{
    HistoryEntry, LedgerFunction, QueryRecord, ShardLedger, ShardQueries, ShardRegistration,
    SENDER_SHARD_INDEX,
};
pub use store::{KeyModification, KeyValue, StateReader, StateStore, TxReceipt, WriteSet};
pub use tx_context::TxContext;
