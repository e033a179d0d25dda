//! Ledger behaviour through the public API, including concurrent
//! registration and snapshot persistence.

use proptest::prelude::*;
use pufvault_state::{
    LedgerError, MemoryStore, ShardAsset, ShardLedger, ShardQueries, ShardRegistration, StateReader,
};
use std::sync::Arc;
use std::thread;

const SHARD_0: &str = "3f1c9a0e5b7d2c4f8a6e1b3d5c7f9a0b2d4e6f8a1c3e5b7d9f0a2c4e6b8d0f1a";
const DATA_0: &str = "9C4E2A0B8D6F1E3C5A7B9D0F2E4C6A8B1D3F5E7C9A0B2D4F6E8C1A3B5D7F9E0C";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn registration<'a>(sender: &'a str, shard_id: &'a str) -> ShardRegistration<'a> {
    ShardRegistration {
        sender,
        shard_id,
        data_id: DATA_0,
        receiver: "peer02.org2",
        threshold: "4",
        puf_num: "6",
        success_num: "0",
    }
}

#[test]
fn test_register_query_and_repeat() {
    init_logger();
    let ledger = ShardLedger::new(MemoryStore::new());

    let args: Vec<String> = ["peer01.org1", SHARD_0, DATA_0, "peer02.org2", "4", "6", "0"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    ledger.invoke("addShard", &args).unwrap();
    let first = ledger.read_shard(SHARD_0).unwrap();

    let err = ledger.invoke("addShard", &args).unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyExists(_)));
    assert!(err.to_string().contains("already exists"));
    assert_eq!(ledger.read_shard(SHARD_0).unwrap(), first);

    let hits = ledger.query_shards_by_sender("peer01.ORG1").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].key, SHARD_0);
    let asset = hits[0].asset().unwrap();
    assert_eq!(asset.sender, "peer01.org1");
    assert_eq!(asset.data_id, DATA_0.to_lowercase());
    assert_eq!(asset.shard_id, SHARD_0);
}

#[test]
fn test_transfer_of_missing_shard_creates_nothing() {
    let ledger = ShardLedger::new(MemoryStore::new());
    let err = ledger.transfer_shard("missing", "peer03.org3").unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
    assert!(ledger.store().is_empty());
    assert!(ledger.get_history_for_shard("missing").unwrap().is_empty());
}

#[test]
fn test_history_lists_every_custodian_in_order() {
    let ledger = ShardLedger::new(MemoryStore::new());
    ledger.add_shard(&registration("peer01.org1", SHARD_0)).unwrap();
    let custodians = ["peer11.org1", "peer12.org2", "peer02.org2"];
    for c in custodians {
        ledger.transfer_shard(SHARD_0, c).unwrap();
    }

    let history = ledger.get_history_for_shard(SHARD_0).unwrap();
    assert_eq!(history.len(), 1 + custodians.len());
    assert!(history.iter().all(|h| !h.is_delete));
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let receivers: Vec<String> = history
        .iter()
        .map(|h| h.value.as_ref().unwrap()["Receiver"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(receivers, vec!["peer02.org2", "peer11.org1", "peer12.org2", "peer02.org2"]);
}

#[test]
fn test_range_query_skips_index_entries() {
    let ledger = ShardLedger::new(MemoryStore::new());
    for id in ["a1", "b2", "c3", "d4"] {
        ledger.add_shard(&registration("peer01.org1", id)).unwrap();
    }

    let keys: Vec<String> = ledger
        .get_shards_by_range("b2", "d4")
        .unwrap()
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(keys, vec!["b2", "c3"]);
    assert_eq!(ledger.get_shards_by_range("", "").unwrap().len(), 4);
}

#[test]
fn test_ad_hoc_selector_through_read_only_capability() {
    let store = Arc::new(MemoryStore::new());
    let ledger = ShardLedger::new(Arc::clone(&store));
    ledger.add_shard(&registration("peer01.org1", "a1")).unwrap();
    ledger.add_shard(&registration("peer03.org3", "b2")).unwrap();
    ledger.transfer_shard("b2", "peer04.org4").unwrap();

    let queries = ShardQueries::new(Arc::clone(&store));
    let hits = queries
        .query_shards(r#"{"selector":{"docType":"shard","Receiver":{"$in":["peer04.org4"]}}}"#)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].key, "b2");

    let err = queries.query_shards(r#"{"selector":{"Receiver":{"$regex":"peer"}}}"#).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidQuery(_)));
    assert_eq!(store.sequence(), 3);
}

#[test]
fn test_index_and_selector_agree() {
    let ledger = ShardLedger::new(MemoryStore::new());
    for (sender, id) in [("peer01.org1", "a1"), ("peer03.org3", "b2"), ("PEER01.org1", "c3")] {
        ledger.add_shard(&registration(sender, id)).unwrap();
    }
    let by_index = ledger.shard_ids_by_sender("peer01.org1").unwrap();
    let by_selector: Vec<String> = ledger
        .query_shards_by_sender("peer01.org1")
        .unwrap()
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(by_index, vec!["a1", "c3"]);
    assert_eq!(by_index, by_selector);
}

#[test]
fn test_concurrent_registration_has_one_winner() {
    init_logger();
    let ledger = Arc::new(ShardLedger::new(MemoryStore::new()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let sender = format!("peer{:02}.org1", i);
                ledger.add_shard(&registration(&sender, SHARD_0))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<&ShardAsset> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for r in &results {
        if let Err(e) = r {
            assert!(
                matches!(e, LedgerError::AlreadyExists(_) | LedgerError::Conflict { .. }),
                "unexpected error: {}",
                e
            );
        }
    }

    let stored = ledger.read_shard(SHARD_0).unwrap();
    assert_eq!(&stored, winners[0]);
    assert_eq!(ledger.get_history_for_shard(SHARD_0).unwrap().len(), 1);
}

#[test]
fn test_snapshot_preserves_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");

    let ledger = ShardLedger::new(MemoryStore::open(&path).unwrap());
    ledger.add_shard(&registration("peer01.org1", SHARD_0)).unwrap();
    ledger.transfer_shard(SHARD_0, "peer11.org1").unwrap();
    ledger.store().save(&path).unwrap();

    let reopened = ShardLedger::new(MemoryStore::open(&path).unwrap());
    assert_eq!(reopened.read_shard(SHARD_0).unwrap().receiver, "peer11.org1");
    assert_eq!(reopened.get_history_for_shard(SHARD_0).unwrap().len(), 2);
    assert_eq!(reopened.shard_ids_by_sender("peer01.org1").unwrap(), vec![SHARD_0]);
    assert!(reopened
        .add_shard(&registration("peer01.org1", SHARD_0))
        .is_err());
    assert_eq!(reopened.store().get_state(SHARD_0).unwrap(), ledger.store().get_state(SHARD_0).unwrap());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_history_matches_writes(receivers in proptest::collection::vec("[a-z]{1,8}\\.org[0-9]", 0..12)) {
        let ledger = ShardLedger::new(MemoryStore::new());
        ledger.add_shard(&registration("peer01.org1", "k")).unwrap();
        for r in &receivers {
            ledger.transfer_shard("k", r).unwrap();
        }

        let history = ledger.get_history_for_shard("k").unwrap();
        prop_assert_eq!(history.len(), receivers.len() + 1);
        for (entry, r) in history.iter().skip(1).zip(&receivers) {
            prop_assert_eq!(entry.value.as_ref().unwrap()["Receiver"].as_str().unwrap(), r.as_str());
        }
        let tx_ids: std::collections::BTreeSet<_> = history.iter().map(|h| h.tx_id.clone()).collect();
        prop_assert_eq!(tx_ids.len(), history.len());
    }
}
