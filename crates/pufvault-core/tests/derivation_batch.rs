//! End-to-end runs of the per-index derivation batch on a scratch directory.

use pufvault_core::identity::read_sidecar;
use pufvault_core::pipeline::open_envelope_file;
use pufvault_core::{compute_data_id, compute_shard_id, CoreError, DerivationJob, ShardName, Sidecar};
use pufvault_crypto::{write_receiver_keypair, ReceiverSecretKey, SymmetricKey};
use std::fs;
use std::path::Path;

const ORIGIN: &str = "192.168.90.12";
const COUNT: u32 = 3;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Fixture {
    dir: tempfile::TempDir,
    job: DerivationJob,
    keys: Vec<SymmetricKey>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let shards = ShardName::new(root.join("1-2Shards"), "8", ".txt");
    let challenges = ShardName::new(root.join("Challenge"), "challenge_128", ".bin");
    let responses = ShardName::new(root.join("Response"), "response_128", ".bin");
    let keys = ShardName::new(root.join("File"), "cipherResponseKey", ".txt");
    let receivers = ShardName::new(root.join("File"), "node_eccpublic", ".pem");

    let mut shard_keys = Vec::new();
    for i in 0..COUNT {
        write(&shards.shard_path(i), format!("shard-{}", i).as_bytes());
        write(&challenges.shard_path(i), &vec![i as u8; 16]);
        write(&responses.shard_path(i), &vec![0xA0 | i as u8; 96]);

        let key = SymmetricKey::generate();
        key.write(&keys.shard_path(i)).unwrap();
        shard_keys.push(key);

        write_receiver_keypair(&receivers.dir, &receivers.file_name(i).replace(".pem", "")).unwrap();
    }

    Fixture {
        dir,
        job: DerivationJob {
            origin: ORIGIN.to_string(),
            count: COUNT,
            shards,
            challenges,
            responses,
            keys,
            receivers,
            out_dir: None,
        },
        keys: shard_keys,
    }
}

fn write(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

fn secret_for(job: &DerivationJob, index: u32) -> ReceiverSecretKey {
    let stem = job.receivers.file_name(index).replace(".pem", "");
    ReceiverSecretKey::load(&job.receivers.dir.join(format!("{}-secret.pem", stem))).unwrap()
}

#[test]
fn test_every_index_produces_sidecars_and_envelope() {
    init_logger();
    let fx = fixture();
    let report = fx.job.run();

    assert!(report.is_complete());
    assert_eq!(report.outcomes.len(), COUNT as usize);

    for artifacts in report.succeeded() {
        let i = artifacts.index;
        let shard = fs::read(fx.job.shards.shard_path(i)).unwrap();
        let expected_shard_id = compute_shard_id(ORIGIN, i, &shard);
        assert_eq!(artifacts.identity.shard_id, expected_shard_id);
        assert_eq!(
            read_sidecar(&fx.job.shards.sidecar_path(i, Sidecar::ShardId)).unwrap(),
            *expected_shard_id.digest()
        );

        let (envelope, response) = open_envelope_file(
            &artifacts.envelope_path,
            &secret_for(&fx.job, i),
            Some(&fx.keys[i as usize]),
        )
        .unwrap();
        assert_eq!(envelope.challenge, vec![i as u8; 16]);
        assert_eq!(response.unwrap(), vec![0xA0 | i as u8; 96]);

        // DataId commits to exactly the challenge and ciphertext inside the envelope.
        assert_eq!(
            compute_data_id(&envelope.challenge, &envelope.cipher_response, &expected_shard_id),
            artifacts.identity.data_id
        );
        assert_eq!(
            read_sidecar(&artifacts.data_id_path).unwrap(),
            *artifacts.identity.data_id.digest()
        );
    }
}

#[test]
fn test_envelope_is_named_after_receiver_key() {
    let fx = fixture();
    let report = fx.job.run();
    let first = report.succeeded().next().unwrap();
    assert_eq!(
        first.envelope_path.file_name().unwrap().to_str().unwrap(),
        "node_eccpublic-0-cipherCRPs.bin"
    );
}

#[test]
fn test_missing_key_abandons_only_that_index() {
    init_logger();
    let fx = fixture();
    fs::remove_file(fx.job.keys.shard_path(1)).unwrap();

    let report = fx.job.run();
    assert!(!report.is_complete());

    let failed: Vec<u32> = report.failed().map(|(i, _)| i).collect();
    assert_eq!(failed, vec![1]);
    let (_, err) = report.failed().next().unwrap();
    assert!(err.is_key_not_found(), "unexpected error: {}", err);

    let ok: Vec<u32> = report.succeeded().map(|a| a.index).collect();
    assert_eq!(ok, vec![0, 2]);
    assert!(!fx.job.envelope_path(1).exists());
    assert!(!fx.job.shards.sidecar_path(1, Sidecar::ShardId).exists());
    assert!(!fx.job.shards.sidecar_path(1, Sidecar::DataId).exists());
    assert!(fx.job.shards.sidecar_path(0, Sidecar::ShardId).exists());
}

#[test]
fn test_missing_receiver_certificate_is_isolated() {
    let fx = fixture();
    fs::remove_file(fx.job.receivers.shard_path(2)).unwrap();

    let report = fx.job.run_with_jobs(2).unwrap();
    let failed: Vec<u32> = report.failed().map(|(i, _)| i).collect();
    assert_eq!(failed, vec![2]);
    assert_eq!(report.succeeded().count(), 2);
    assert!(!fx.job.shards.sidecar_path(2, Sidecar::ShardId).exists());
    assert!(!fx.job.shards.sidecar_path(2, Sidecar::DataId).exists());
    assert!(!fx.job.envelope_path(2).exists());
}

#[test]
fn test_missing_shard_is_not_found() {
    let fx = fixture();
    fs::remove_file(fx.job.shards.shard_path(0)).unwrap();

    let report = fx.job.run();
    let (index, err) = report.failed().next().unwrap();
    assert_eq!(index, 0);
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[test]
fn test_out_dir_redirects_artifacts() {
    let fx = fixture();
    let out = fx.dir.path().join("artifacts");
    let job = DerivationJob {
        out_dir: Some(out.clone()),
        ..fx.job.clone()
    };

    let report = job.run();
    assert!(report.is_complete());
    assert!(out.join("8-0-ShardId.txt").exists());
    assert!(out.join("8-2-DataId.txt").exists());
    assert!(out.join("node_eccpublic-1-cipherCRPs.bin").exists());
}
