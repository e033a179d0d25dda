//! The ledger record for one registered shard.

use serde::{Deserialize, Serialize};

/// `docType` of every shard record; the selector queries filter on it.
pub const SHARD_DOC_TYPE: &str = "shard";

/// One shard's provenance record, stored as JSON under its `ShardId`.
///
/// Field names are the wire names other ledger clients read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAsset {
    #[serde(rename = "docType")]
    pub object_type: String,
    #[serde(rename = "Sender")]
    pub sender: String,
    #[serde(rename = "ShardId")]
    pub shard_id: String,
    #[serde(rename = "DataId")]
    pub data_id: String,
    #[serde(rename = "Receiver")]
    pub receiver: String,
    /// Authentication threshold τ.
    #[serde(rename = "Threshold")]
    pub threshold: i64,
    /// Number of PUF instances behind the shard.
    #[serde(rename = "PUFNum")]
    pub puf_num: i64,
    #[serde(rename = "SuccessNum")]
    pub success_num: i64,
}

impl ShardAsset {
    /// Builds a record with the ledger's case rules applied: sender, data id
    /// and receiver are lower-cased, the shard id is kept as given.
    pub fn new(
        sender: &str,
        shard_id: &str,
        data_id: &str,
        receiver: &str,
        threshold: i64,
        puf_num: i64,
        success_num: i64,
    ) -> Self {
        ShardAsset {
            object_type: SHARD_DOC_TYPE.to_string(),
            sender: sender.to_lowercase(),
            shard_id: shard_id.to_string(),
            data_id: data_id.to_lowercase(),
            receiver: receiver.to_lowercase(),
            threshold,
            puf_num,
            success_num,
        }
    }

    /// `0 <= SuccessNum <= Threshold <= PUFNum`. Stored but never enforced
    /// by the ledger itself.
    pub fn tally_is_well_formed(&self) -> bool {
        0 <= self.success_num && self.success_num <= self.threshold && self.threshold <= self.puf_num
    }

    /// Enough PUF instances answered correctly to meet the threshold.
    pub fn is_authenticated(&self) -> bool {
        self.success_num >= self.threshold
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
