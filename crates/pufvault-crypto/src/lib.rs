//! Encryption layer for PUF challenge/response shards.
//!
//! Two stages, applied in order:
//! - `symmetric`: AES-128-CBC over the response shard with a per-shard key
//! - `envelope`: ECIES seal of (challenge, cipher-response) for one receiver
//!
//! The block cipher and curve arithmetic come from RustCrypto; this crate
//! only fixes key handling, wire formats and error reporting.

pub mod envelope;
pub mod error;
pub mod keys;
pub mod symmetric;

pub use envelope::{
    generate_receiver_keypair, open, open_crp, seal, seal_crp, write_receiver_keypair, CrpEnvelope,
    ReceiverPublicKey, ReceiverSecretKey, SealedEnvelope,
};
pub use error::{CryptoError, CryptoResult};
pub use symmetric::SymmetricKey;
