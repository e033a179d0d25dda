// PROVENANCE LEDGER: shard chaincode
// Registers PUF CRP shards, tracks custody and answers provenance queries.
//
// SAFETY INVARIANTS:
// 1. A ShardId is registered at most once; a repeat registration fails and
//    leaves state untouched
// 2. A record and its Sender~ShardId index entry commit in one transaction
// 3. Custody transfer rewrites only the Receiver field
// 4. No exposed operation removes a record; history keeps every value
// 5. Caller-supplied selectors run only through the read-only ShardQueries

use crate::asset::{ShardAsset, SHARD_DOC_TYPE};
use crate::composite::{split_composite_key, COMPOSITE_KEY_NAMESPACE};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{KeyValue, StateReader, StateStore};
use crate::tx_context::TxContext;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Composite index from sender to the shards it registered.
pub const SENDER_SHARD_INDEX: &str = "Sender~ShardId";

/// Index entries carry no data; an empty value would read as absent.
const INDEX_MARKER: [u8; 1] = [0x00];

// ==================== RESULT TYPES ====================

/// One query hit: the state key and its JSON record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Record")]
    pub record: Value,
}

impl QueryRecord {
    fn from_key_value(kv: KeyValue) -> LedgerResult<Self> {
        Ok(QueryRecord {
            record: serde_json::from_slice(&kv.value)?,
            key: kv.key,
        })
    }

    pub fn asset(&self) -> LedgerResult<ShardAsset> {
        Ok(ShardAsset::deserialize(&self.record)?)
    }
}

/// One historic value of a shard record; `Value` is null for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "TxId")]
    pub tx_id: String,
    #[serde(rename = "Value")]
    pub value: Option<Value>,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "IsDelete")]
    pub is_delete: bool,
}

// ==================== REGISTRATION ====================

/// Raw `addShard` arguments, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRegistration<'a> {
    pub sender: &'a str,
    pub shard_id: &'a str,
    pub data_id: &'a str,
    pub receiver: &'a str,
    pub threshold: &'a str,
    pub puf_num: &'a str,
    pub success_num: &'a str,
}

const ORDINALS: [&str; 7] = ["1st", "2nd", "3rd", "4th", "5th", "6th", "7th"];

impl<'a> ShardRegistration<'a> {
    pub fn from_args(args: &'a [String]) -> LedgerResult<Self> {
        match args {
            [sender, shard_id, data_id, receiver, threshold, puf_num, success_num] => Ok(ShardRegistration {
                sender,
                shard_id,
                data_id,
                receiver,
                threshold,
                puf_num,
                success_num,
            }),
            _ => Err(LedgerError::arity(7)),
        }
    }

    fn fields(&self) -> [&'a str; 7] {
        [
            self.sender,
            self.shard_id,
            self.data_id,
            self.receiver,
            self.threshold,
            self.puf_num,
            self.success_num,
        ]
    }

    /// Check every argument and build the record to store.
    pub fn validate(&self) -> LedgerResult<ShardAsset> {
        for (field, ordinal) in self.fields().iter().zip(ORDINALS) {
            if field.is_empty() {
                return Err(LedgerError::InvalidArgument(format!(
                    "{} argument must be a non-empty string",
                    ordinal
                )));
            }
        }
        if self.shard_id.starts_with(COMPOSITE_KEY_NAMESPACE) {
            return Err(LedgerError::InvalidArgument(
                "2nd argument must not start with U+0000".to_string(),
            ));
        }

        let numeric = |value: &str, ordinal: &str| {
            value.parse::<i64>().map_err(|_| {
                LedgerError::InvalidArgument(format!("{} argument must be a numeric string", ordinal))
            })
        };
        let threshold = numeric(self.threshold, ORDINALS[4])?;
        let puf_num = numeric(self.puf_num, ORDINALS[5])?;
        let success_num = numeric(self.success_num, ORDINALS[6])?;

        Ok(ShardAsset::new(
            self.sender,
            self.shard_id,
            self.data_id,
            self.receiver,
            threshold,
            puf_num,
            success_num,
        ))
    }
}

// ==================== READ-ONLY QUERIES ====================

/// Read-only query capability. Holds a reader and nothing that can write,
/// so an ad hoc selector can never mutate the ledger.
#[derive(Debug, Clone)]
pub struct ShardQueries<R> {
    reader: R,
}

impl<R: StateReader> ShardQueries<R> {
    pub fn new(reader: R) -> Self {
        ShardQueries { reader }
    }

    /// Run a caller-supplied selector as is.
    pub fn query_shards(&self, query: &str) -> LedgerResult<Vec<QueryRecord>> {
        debug!("getQueryResultForQueryString queryString: {}", query);
        let records = self
            .reader
            .get_query_result(query)?
            .into_iter()
            .map(QueryRecord::from_key_value)
            .collect::<LedgerResult<Vec<_>>>()?;
        debug!("query returned {} record(s)", records.len());
        Ok(records)
    }
}

// ==================== LEDGER ====================

/// The shard chaincode over any `StateStore`.
#[derive(Debug)]
pub struct ShardLedger<S> {
    store: S,
}

impl<S: StateStore> ShardLedger<S> {
    pub fn new(store: S) -> Self {
        ShardLedger { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn queries(&self) -> ShardQueries<&S> {
        ShardQueries::new(&self.store)
    }

    /// Register a new shard and index it under its sender.
    pub fn add_shard(&self, registration: &ShardRegistration<'_>) -> LedgerResult<ShardAsset> {
        let asset = registration.validate()?;
        info!("start init shard {}", asset.shard_id);

        let mut tx = TxContext::new(&self.store);
        if tx.get_state(&asset.shard_id)?.is_some() {
            warn!("This shard already exists: {}", asset.shard_id);
            return Err(LedgerError::AlreadyExists(asset.shard_id));
        }
        tx.put_state(&asset.shard_id, asset.to_json()?)?;

        let index_key = tx.create_composite_key(SENDER_SHARD_INDEX, &[asset.sender.as_str(), asset.shard_id.as_str()])?;
        tx.put_state(&index_key, INDEX_MARKER.to_vec())?;

        let receipt = tx.commit()?;
        info!("end init shard {} ({})", asset.shard_id, receipt.tx_id);
        Ok(asset)
    }

    /// Hand custody of a shard to `new_receiver`.
    pub fn transfer_shard(&self, shard_id: &str, new_receiver: &str) -> LedgerResult<ShardAsset> {
        let new_receiver = new_receiver.to_lowercase();
        info!("start transferShard {} {}", shard_id, new_receiver);

        let mut tx = TxContext::new(&self.store);
        let bytes = tx
            .get_state(shard_id)?
            .ok_or_else(|| LedgerError::NotFound(shard_id.to_string()))?;
        let mut asset = ShardAsset::from_json(&bytes)?;
        asset.receiver = new_receiver;
        tx.put_state(shard_id, asset.to_json()?)?;
        tx.commit()?;

        info!("end transferShard {} (success)", shard_id);
        Ok(asset)
    }

    fn read_shard_bytes(&self, shard_id: &str) -> LedgerResult<Vec<u8>> {
        self.store
            .get_state(shard_id)?
            .ok_or_else(|| LedgerError::NotFound(shard_id.to_string()))
    }

    pub fn read_shard(&self, shard_id: &str) -> LedgerResult<ShardAsset> {
        Ok(ShardAsset::from_json(&self.read_shard_bytes(shard_id)?)?)
    }

    /// Every shard registered by `sender` (case-insensitive), via a selector.
    pub fn query_shards_by_sender(&self, sender: &str) -> LedgerResult<Vec<QueryRecord>> {
        let query = json!({
            "selector": { "docType": SHARD_DOC_TYPE, "Sender": sender.to_lowercase() }
        });
        self.queries().query_shards(&query.to_string())
    }

    /// Same answer as [`Self::query_shards_by_sender`], from the composite
    /// index instead of a selector scan.
    pub fn shard_ids_by_sender(&self, sender: &str) -> LedgerResult<Vec<String>> {
        let sender = sender.to_lowercase();
        self.store
            .get_state_by_partial_composite_key(SENDER_SHARD_INDEX, &[sender.as_str()])?
            .into_iter()
            .map(|kv| -> LedgerResult<String> {
                let (_, mut attributes) = split_composite_key(&kv.key)?;
                match attributes.len() {
                    2 => Ok(attributes.remove(1)),
                    n => Err(LedgerError::Store(format!(
                        "{} index entry has {} attributes, expected 2",
                        SENDER_SHARD_INDEX, n
                    ))),
                }
            })
            .collect()
    }

    /// Records with keys in `[start_key, end_key)`.
    pub fn get_shards_by_range(&self, start_key: &str, end_key: &str) -> LedgerResult<Vec<QueryRecord>> {
        self.store
            .get_state_by_range(start_key, end_key)?
            .into_iter()
            .map(QueryRecord::from_key_value)
            .collect()
    }

    pub fn get_history_for_shard(&self, shard_id: &str) -> LedgerResult<Vec<HistoryEntry>> {
        info!("start getHistoryForShard: {}", shard_id);
        self.store
            .get_history_for_key(shard_id)?
            .into_iter()
            .map(|m| -> LedgerResult<HistoryEntry> {
                let value = match (&m.value, m.is_delete) {
                    (Some(bytes), false) => Some(serde_json::from_slice(bytes)?),
                    _ => None,
                };
                Ok(HistoryEntry {
                    tx_id: m.tx_id,
                    value,
                    timestamp: m.timestamp,
                    is_delete: m.is_delete,
                })
            })
            .collect()
    }

    /// Removal is disabled: shards stay on the ledger for audit.
    pub fn delete_shard(&self, shard_id: &str) -> LedgerResult<()> {
        warn!("rejected delete of shard {}", shard_id);
        Err(LedgerError::Unsupported(format!(
            "delete is disabled; shard {} is retained",
            shard_id
        )))
    }

    /// String-level entry point: `function` with positional `args`. Returns
    /// the JSON payload (empty for writes).
    pub fn invoke(&self, function: &str, args: &[String]) -> LedgerResult<Vec<u8>> {
        let function: LedgerFunction = function.parse()?;
        info!("invoke is running {}", function);
        if args.len() != function.arity() {
            return Err(LedgerError::arity(function.arity()));
        }

        match function {
            LedgerFunction::AddShard => {
                self.add_shard(&ShardRegistration::from_args(args)?)?;
                Ok(Vec::new())
            }
            LedgerFunction::TransferShard => {
                self.transfer_shard(&args[0], &args[1])?;
                Ok(Vec::new())
            }
            LedgerFunction::ReadShard => self.read_shard_bytes(&args[0]),
            LedgerFunction::QueryShardsBySender => Ok(serde_json::to_vec(&self.query_shards_by_sender(&args[0])?)?),
            LedgerFunction::QueryShards => Ok(serde_json::to_vec(&self.queries().query_shards(&args[0])?)?),
            LedgerFunction::GetShardsByRange => {
                Ok(serde_json::to_vec(&self.get_shards_by_range(&args[0], &args[1])?)?)
            }
            LedgerFunction::GetHistoryForShard => Ok(serde_json::to_vec(&self.get_history_for_shard(&args[0])?)?),
            LedgerFunction::Delete => {
                self.delete_shard(&args[0])?;
                Ok(Vec::new())
            }
        }
    }
}

// ==================== DISPATCH ====================

/// Functions reachable through [`ShardLedger::invoke`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFunction {
    AddShard,
    TransferShard,
    ReadShard,
    QueryShardsBySender,
    QueryShards,
    GetShardsByRange,
    GetHistoryForShard,
    Delete,
}

impl LedgerFunction {
    pub const ALL: [LedgerFunction; 8] = [
        LedgerFunction::AddShard,
        LedgerFunction::TransferShard,
        LedgerFunction::ReadShard,
        LedgerFunction::QueryShardsBySender,
        LedgerFunction::QueryShards,
        LedgerFunction::GetShardsByRange,
        LedgerFunction::GetHistoryForShard,
        LedgerFunction::Delete,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LedgerFunction::AddShard => "addShard",
            LedgerFunction::TransferShard => "transferShard",
            LedgerFunction::ReadShard => "readShard",
            LedgerFunction::QueryShardsBySender => "queryShardsBySender",
            LedgerFunction::QueryShards => "queryShards",
            LedgerFunction::GetShardsByRange => "getShardsByRange",
            LedgerFunction::GetHistoryForShard => "getHistoryForShard",
            LedgerFunction::Delete => "delete",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            LedgerFunction::AddShard => 7,
            LedgerFunction::TransferShard | LedgerFunction::GetShardsByRange => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for LedgerFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LedgerFunction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LedgerFunction::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| {
                warn!("invoke did not find func: {}", s);
                LedgerError::InvalidArgument(format!("Received unknown function invocation: {}", s))
            })
    }
}
