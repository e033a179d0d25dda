// In-memory state store
//
// SAFETY INVARIANTS:
// 1. Commits are serialized under one write lock; a commit either applies
//    every write or none
// 2. Transaction sequence numbers increase strictly; each key's version is
//    the sequence of its last writer
// 3. A commit whose read set no longer matches committed versions fails
//    with Conflict and leaves state untouched
// 4. History is append-only

use crate::composite::{is_composite_key, partial_key_range};
use crate::error::{LedgerError, LedgerResult};
use crate::selector::Query;
use crate::store::{KeyModification, KeyValue, StateReader, StateStore, TxReceipt, VersionedValue, WriteSet};
use chrono::Utc;
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::Path;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    sequence: u64,
    state: BTreeMap<String, VersionedValue>,
    history: BTreeMap<String, Vec<KeyModification>>,
}

/// A versioned key/value store held in memory, optionally persisted as a
/// JSON snapshot between runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot, or start empty if `path` does not exist yet.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("no ledger state at {}, starting empty", path.display());
            Ok(Self::new())
        }
    }

    pub fn load(path: &Path) -> LedgerResult<Self> {
        let bytes = fs::read(path).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state: StoreState = serde_json::from_slice(&bytes)?;
        info!(
            "loaded ledger state from {} ({} keys, sequence {})",
            path.display(),
            state.state.len(),
            state.sequence
        );
        Ok(MemoryStore {
            inner: RwLock::new(state),
        })
    }

    pub fn save(&self, path: &Path) -> LedgerResult<()> {
        let io_err = |source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(&*self.inner.read())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, bytes).map_err(io_err)?;
        debug!("saved ledger state to {}", path.display());
        Ok(())
    }

    /// Sequence number of the last committed transaction.
    pub fn sequence(&self) -> u64 {
        self.inner.read().sequence
    }

    pub fn len(&self) -> usize {
        self.inner.read().state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().state.is_empty()
    }

    fn scan(&self, start: Bound<&str>, end: Bound<&str>) -> Vec<KeyValue> {
        self.inner
            .read()
            .state
            .range::<str, _>((start, end))
            .map(|(key, v)| KeyValue {
                key: key.clone(),
                value: v.value.clone(),
            })
            .collect()
    }
}

impl StateReader for MemoryStore {
    fn get_versioned_state(&self, key: &str) -> LedgerResult<Option<VersionedValue>> {
        Ok(self.inner.read().state.get(key).cloned())
    }

    fn get_state_by_range(&self, start: &str, end: &str) -> LedgerResult<Vec<KeyValue>> {
        if !start.is_empty() && !end.is_empty() && start > end {
            return Err(LedgerError::InvalidArgument(format!(
                "range start {:?} sorts after end {:?}",
                start, end
            )));
        }
        let start = if start.is_empty() { Bound::Unbounded } else { Bound::Included(start) };
        let end = if end.is_empty() { Bound::Unbounded } else { Bound::Excluded(end) };
        Ok(self
            .scan(start, end)
            .into_iter()
            .filter(|kv| !is_composite_key(&kv.key))
            .collect())
    }

    fn get_state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[&str],
    ) -> LedgerResult<Vec<KeyValue>> {
        let (start, end) = partial_key_range(object_type, attributes)?;
        Ok(self.scan(Bound::Included(start.as_str()), Bound::Excluded(end.as_str())))
    }

    fn get_history_for_key(&self, key: &str) -> LedgerResult<Vec<KeyModification>> {
        Ok(self.inner.read().history.get(key).cloned().unwrap_or_default())
    }

    fn get_query_result(&self, query: &str) -> LedgerResult<Vec<KeyValue>> {
        let query = Query::parse(query)?;
        let guard = self.inner.read();
        let matched = guard
            .state
            .iter()
            .filter(|(key, _)| !is_composite_key(key))
            .filter(|(_, v)| {
                serde_json::from_slice::<serde_json::Value>(&v.value)
                    .map(|doc| doc.is_object() && query.selector.matches(&doc))
                    .unwrap_or(false)
            })
            .map(|(key, v)| KeyValue {
                key: key.clone(),
                value: v.value.clone(),
            });
        Ok(query.window(matched))
    }
}

impl StateStore for MemoryStore {
    fn commit(&self, writes: WriteSet) -> LedgerResult<TxReceipt> {
        let mut guard = self.inner.write();

        for (key, read_version) in writes.reads() {
            let current = guard.state.get(key).map(|v| v.version);
            if current != *read_version {
                return Err(LedgerError::Conflict {
                    key: key.clone(),
                    read: *read_version,
                    current,
                });
            }
        }

        let sequence = guard.sequence + 1;
        let tx_id = format!("tx-{:016x}", sequence);
        let timestamp = Utc::now();
        let state = &mut *guard;

        for (key, value) in writes.writes() {
            match value {
                Some(bytes) => {
                    state.state.insert(
                        key.clone(),
                        VersionedValue {
                            value: bytes.clone(),
                            version: sequence,
                        },
                    );
                }
                None => {
                    state.state.remove(key);
                }
            }
            state.history.entry(key.clone()).or_default().push(KeyModification {
                tx_id: tx_id.clone(),
                value: value.clone(),
                timestamp,
                is_delete: value.is_none(),
            });
        }
        state.sequence = sequence;

        debug!("committed {} ({} writes)", tx_id, writes.writes().len());
        Ok(TxReceipt {
            tx_id,
            sequence,
            timestamp,
            keys_written: writes.writes().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::create_composite_key;

    fn put(store: &MemoryStore, key: &str, value: &[u8]) -> TxReceipt {
        let mut ws = WriteSet::new();
        ws.put(key, value.to_vec());
        store.commit(ws).unwrap()
    }

    #[test]
    fn test_commit_bumps_sequence_and_version() {
        let store = MemoryStore::new();
        let r1 = put(&store, "a", b"1");
        let r2 = put(&store, "a", b"2");
        assert_eq!((r1.sequence, r2.sequence), (1, 2));
        assert_ne!(r1.tx_id, r2.tx_id);

        let v = store.get_versioned_state("a").unwrap().unwrap();
        assert_eq!(v.value, b"2");
        assert_eq!(v.version, 2);
        assert_eq!(store.sequence(), 2);
    }

    #[test]
    fn test_stale_read_conflicts_without_writing() {
        let store = MemoryStore::new();
        let mut ws = WriteSet::new();
        ws.record_read("a", None);
        ws.put("a", b"late".to_vec());
        ws.put("b", b"side".to_vec());

        put(&store, "a", b"first");

        let err = store.commit(ws).unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { ref key, read: None, current: Some(1) } if key == "a"));
        assert_eq!(store.get_state("a").unwrap().unwrap(), b"first");
        assert!(store.get_state("b").unwrap().is_none());
        assert_eq!(store.sequence(), 1);
    }

    #[test]
    fn test_delete_leaves_null_history_entry() {
        let store = MemoryStore::new();
        put(&store, "a", b"1");
        let mut ws = WriteSet::new();
        ws.delete("a");
        store.commit(ws).unwrap();

        assert!(store.get_state("a").unwrap().is_none());
        let history = store.get_history_for_key("a").unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_delete);
        assert!(history[1].is_delete);
        assert_eq!(history[1].value, None);
    }

    #[test]
    fn test_range_is_half_open_and_skips_composite_keys() {
        let store = MemoryStore::new();
        for key in ["a", "b", "c", "d"] {
            put(&store, key, b"{}");
        }
        let index = create_composite_key("Sender~ShardId", &["x", "b"]).unwrap();
        put(&store, &index, &[0x00]);

        let keys: Vec<String> = store
            .get_state_by_range("b", "d")
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["b", "c"]);

        let all = store.get_state_by_range("", "").unwrap();
        assert_eq!(all.len(), 4);
        assert!(store.get_state_by_range("d", "a").is_err());
    }

    #[test]
    fn test_partial_composite_scan() {
        let store = MemoryStore::new();
        for (sender, id) in [("s1", "i1"), ("s1", "i2"), ("s2", "i3")] {
            put(&store, &create_composite_key("Sender~ShardId", &[sender, id]).unwrap(), &[0x00]);
        }
        let hits = store
            .get_state_by_partial_composite_key("Sender~ShardId", &["s1"])
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(store.get_state_by_partial_composite_key("Sender~ShardId", &[]).unwrap().len(), 3);
    }

    #[test]
    fn test_query_ignores_non_json_values() {
        let store = MemoryStore::new();
        put(&store, "a", br#"{"docType":"shard"}"#);
        put(&store, "b", b"\xff\xfe");
        put(&store, "c", b"[1,2]");
        let hits = store.get_query_result(r#"{"selector":{"docType":"shard"}}"#).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "a");
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger/state.json");

        let store = MemoryStore::new();
        put(&store, "a", b"1");
        put(&store, "a", b"2");
        store.save(&path).unwrap();

        let loaded = MemoryStore::open(&path).unwrap();
        assert_eq!(loaded.sequence(), 2);
        assert_eq!(loaded.get_state("a").unwrap().unwrap(), b"2");
        assert_eq!(loaded.get_history_for_key("a").unwrap(), store.get_history_for_key("a").unwrap());

        let fresh = MemoryStore::open(&dir.path().join("missing.json")).unwrap();
        assert!(fresh.is_empty());
    }
}
