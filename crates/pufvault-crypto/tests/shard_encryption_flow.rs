//! Full encryption path for one shard index: AES the response, seal the
//! pair for a receiver, then reverse both stages on the receiving side.

use pufvault_crypto::{
    generate_receiver_keypair, open_crp, seal_crp, symmetric, CrpEnvelope, SymmetricKey,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_receiver_recovers_response_with_shard_key() {
    init_logger();

    let challenge = vec![0xC0; 16 * 100];
    let response = vec![0x5A; 16 * 6 * 100];
    let shard_key = SymmetricKey::generate();
    let (receiver_secret, receiver_public) = generate_receiver_keypair();

    let cipher_response = symmetric::encrypt(&response, &shard_key).unwrap();
    let sealed = seal_crp(
        &CrpEnvelope::new(challenge.clone(), cipher_response.clone()),
        &receiver_public,
    )
    .unwrap();

    let opened = open_crp(&sealed, &receiver_secret).unwrap();
    assert_eq!(opened.challenge, challenge);
    assert_eq!(opened.cipher_response, cipher_response);

    // The envelope alone does not reveal the response; the shard key is still required.
    assert_ne!(opened.cipher_response, response);
    assert_eq!(symmetric::decrypt(&opened.cipher_response, &shard_key).unwrap(), response);
}

#[test]
fn test_key_files_on_disk() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();

    let key_path = dir.path().join("cipherResponseKey-0.txt");
    let key = SymmetricKey::generate();
    key.write(&key_path).unwrap();
    assert_eq!(SymmetricKey::load(&key_path).unwrap(), key);

    let (secret_path, public_path) =
        pufvault_crypto::write_receiver_keypair(dir.path(), "node_eccpublic-0").unwrap();
    let public = pufvault_crypto::ReceiverPublicKey::load(&public_path).unwrap();
    let secret = pufvault_crypto::ReceiverSecretKey::load(&secret_path).unwrap();

    let sealed = seal_crp(&CrpEnvelope::new(b"c".to_vec(), b"r".to_vec()), &public).unwrap();
    assert_eq!(open_crp(&sealed, &secret).unwrap().challenge, b"c");
}
