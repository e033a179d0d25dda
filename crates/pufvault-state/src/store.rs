//! Versioned key/value state behind the ledger.
//!
//! `StateReader` is everything a query needs; `StateStore` adds the single
//! write path, an atomic commit of a `WriteSet`.

use crate::error::LedgerResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sequence number of the transaction that last wrote a key.
pub type Version = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// One historic write of a key. Deletes carry no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyModification {
    pub tx_id: String,
    #[serde(with = "hex_bytes_opt")]
    pub value: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
    pub is_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub keys_written: usize,
}

/// Buffered reads and writes of one transaction.
///
/// `reads` maps each key to the version seen when it was first read
/// (`None` = absent). `writes` maps each key to its new value, `None`
/// being a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    reads: BTreeMap<String, Option<Version>>,
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the first observed version; later reads of the same key are ignored.
    pub fn record_read(&mut self, key: &str, version: Option<Version>) {
        self.reads.entry(key.to_string()).or_insert(version);
    }

    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.writes.insert(key.into(), Some(value));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.writes.insert(key.into(), None);
    }

    /// `Some(None)` when the key is pending deletion.
    pub fn pending(&self, key: &str) -> Option<Option<&[u8]>> {
        self.writes.get(key).map(|v| v.as_deref())
    }

    pub fn reads(&self) -> &BTreeMap<String, Option<Version>> {
        &self.reads
    }

    pub fn writes(&self) -> &BTreeMap<String, Option<Vec<u8>>> {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

pub trait StateReader {
    fn get_versioned_state(&self, key: &str) -> LedgerResult<Option<VersionedValue>>;

    fn get_state(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        Ok(self.get_versioned_state(key)?.map(|v| v.value))
    }

    /// Keys in `[start, end)` in key order, composite keys excluded. An
    /// empty bound is open on that side.
    fn get_state_by_range(&self, start: &str, end: &str) -> LedgerResult<Vec<KeyValue>>;

    fn get_state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[&str],
    ) -> LedgerResult<Vec<KeyValue>>;

    /// Every committed write of `key`, oldest first.
    fn get_history_for_key(&self, key: &str) -> LedgerResult<Vec<KeyModification>>;

    /// Run a JSON selector query over the plain (non-composite) keys.
    fn get_query_result(&self, query: &str) -> LedgerResult<Vec<KeyValue>>;
}

pub trait StateStore: StateReader {
    /// Validate the read set and apply every write under one transaction id,
    /// or apply nothing.
    fn commit(&self, writes: WriteSet) -> LedgerResult<TxReceipt>;
}

macro_rules! forward_state_reader {
    ($($ty:ty),*) => {$(
        impl<T: StateReader + ?Sized> StateReader for $ty {
            fn get_versioned_state(&self, key: &str) -> LedgerResult<Option<VersionedValue>> {
                (**self).get_versioned_state(key)
            }
            fn get_state_by_range(&self, start: &str, end: &str) -> LedgerResult<Vec<KeyValue>> {
                (**self).get_state_by_range(start, end)
            }
            fn get_state_by_partial_composite_key(
                &self,
                object_type: &str,
                attributes: &[&str],
            ) -> LedgerResult<Vec<KeyValue>> {
                (**self).get_state_by_partial_composite_key(object_type, attributes)
            }
            fn get_history_for_key(&self, key: &str) -> LedgerResult<Vec<KeyModification>> {
                (**self).get_history_for_key(key)
            }
            fn get_query_result(&self, query: &str) -> LedgerResult<Vec<KeyValue>> {
                (**self).get_query_result(query)
            }
        }
    )*};
}

forward_state_reader!(&T, Arc<T>);

impl<T: StateStore + ?Sized> StateStore for &T {
    fn commit(&self, writes: WriteSet) -> LedgerResult<TxReceipt> {
        (**self).commit(writes)
    }
}

impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn commit(&self, writes: WriteSet) -> LedgerResult<TxReceipt> {
        (**self).commit(writes)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| hex::decode(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
