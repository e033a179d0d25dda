#![no_main]

use libfuzzer_sys::fuzz_target;
use pufvault_crypto::symmetric::{decrypt, SymmetricKey};

fuzz_target!(|data: &[u8]| {
    let key = SymmetricKey::from_bytes(&[7u8; 16]).expect("static key is 16 bytes");
    let _ = decrypt(data, &key);
});
