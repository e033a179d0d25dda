#![no_main]

use libfuzzer_sys::fuzz_target;
use pufvault_crypto::envelope::{CrpEnvelope, SealedEnvelope};

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic.
    if let Ok(envelope) = CrpEnvelope::decode(data) {
        assert_eq!(envelope.encode().unwrap(), data);
    }
    let _ = SealedEnvelope::from_bytes(data.to_vec());
});
