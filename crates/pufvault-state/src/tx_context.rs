//! Transaction simulation over a `StateStore`.
//!
//! Reads see the transaction's own pending writes first, then committed
//! state. Every committed read is recorded with its version so that
//! `commit` can refuse to apply writes computed from stale data.

use crate::composite::create_composite_key;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{KeyModification, KeyValue, StateReader, StateStore, TxReceipt, WriteSet};

pub struct TxContext<'a, S: StateStore + ?Sized> {
    store: &'a S,
    writes: WriteSet,
}

impl<'a, S: StateStore + ?Sized> TxContext<'a, S> {
    pub fn new(store: &'a S) -> Self {
        TxContext {
            store,
            writes: WriteSet::new(),
        }
    }

    pub fn get_state(&mut self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.pending(key) {
            return Ok(pending.map(<[u8]>::to_vec));
        }
        let current = self.store.get_versioned_state(key)?;
        self.writes.record_read(key, current.as_ref().map(|v| v.version));
        Ok(current.map(|v| v.value))
    }

    pub fn put_state(&mut self, key: &str, value: Vec<u8>) -> LedgerResult<()> {
        if key.is_empty() {
            return Err(LedgerError::InvalidArgument("key must not be empty".to_string()));
        }
        self.writes.put(key, value);
        Ok(())
    }

    pub fn del_state(&mut self, key: &str) -> LedgerResult<()> {
        if key.is_empty() {
            return Err(LedgerError::InvalidArgument("key must not be empty".to_string()));
        }
        self.writes.delete(key);
        Ok(())
    }

    pub fn create_composite_key(&self, object_type: &str, attributes: &[&str]) -> LedgerResult<String> {
        create_composite_key(object_type, attributes)
    }

    /// Committed state only; range reads are not tracked for conflicts.
    pub fn get_state_by_range(&self, start: &str, end: &str) -> LedgerResult<Vec<KeyValue>> {
        self.store.get_state_by_range(start, end)
    }

    pub fn get_history_for_key(&self, key: &str) -> LedgerResult<Vec<KeyModification>> {
        self.store.get_history_for_key(key)
    }

    pub fn write_set(&self) -> &WriteSet {
        &self.writes
    }

    /// Apply every buffered write atomically under one transaction id.
    pub fn commit(self) -> LedgerResult<TxReceipt> {
        self.store.commit(self.writes)
    }
}
