//! Envelope stage: seals (challenge, cipher-response) for one receiver.
//!
//! ECIES over secp256k1. A fresh ephemeral key agrees a shared secret with
//! the receiver's public key, HKDF-SHA256 turns it into an AES-256-GCM key,
//! and the payload is sealed under a random nonce. The same shard can be
//! sealed for any number of receivers; each envelope opens only with the
//! matching secret key.
//!
//! Wire format: ephemeral pubkey (33 bytes, SEC1 compressed) || nonce (12 bytes) || ciphertext (includes GCM tag)

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{read_key_file, write_key_file};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use hkdf::Hkdf;
use k256::ecdh::{diffie_hellman, EphemeralSecret};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use k256::{PublicKey, SecretKey};
use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Domain separator for envelope key derivation.
const ENVELOPE_DOMAIN: &[u8] = b"pufvault-crp-envelope-v1";

pub const EPHEMERAL_KEY_LEN: usize = 33;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const PEM_PREFIX: &[u8] = b"-----BEGIN";

// ==================== KEYS ====================

/// A custodian node's public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiverPublicKey(PublicKey);

impl ReceiverPublicKey {
    /// Parse an SPKI PEM (`-----BEGIN PUBLIC KEY-----`).
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        PublicKey::from_public_key_pem(pem.trim())
            .map(ReceiverPublicKey)
            .map_err(|e| CryptoError::InvalidKey(format!("receiver public key PEM: {}", e)))
    }

    /// Accepts either PEM text or raw SEC1 point bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if looks_like_pem(bytes) {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| CryptoError::InvalidKey("PEM is not valid UTF-8".to_string()))?;
            return Self::from_pem(text);
        }
        PublicKey::from_sec1_bytes(bytes)
            .map(ReceiverPublicKey)
            .map_err(|_| CryptoError::InvalidKey("receiver public key is not a SEC1 point".to_string()))
    }

    pub fn load(path: &Path) -> CryptoResult<Self> {
        let bytes = read_key_file(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn to_pem(&self) -> CryptoResult<String> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(format!("encode public key: {}", e)))
    }

    /// Compressed SEC1 encoding.
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(true).as_bytes().to_vec()
    }
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(PEM_PREFIX)
}

/// A custodian node's secret key. Only needed to open envelopes.
#[derive(Clone)]
pub struct ReceiverSecretKey(SecretKey);

impl ReceiverSecretKey {
    /// Parse a PKCS#8 PEM, falling back to SEC1 (`EC PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let pem = pem.trim();
        SecretKey::from_pkcs8_pem(pem)
            .or_else(|_| SecretKey::from_sec1_pem(pem))
            .map(ReceiverSecretKey)
            .map_err(|_| CryptoError::InvalidKey("receiver secret key PEM".to_string()))
    }

    pub fn load(path: &Path) -> CryptoResult<Self> {
        let bytes = read_key_file(path)?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| CryptoError::InvalidKey("PEM is not valid UTF-8".to_string()))?;
        Self::from_pem(text)
    }

    pub fn to_pem(&self) -> CryptoResult<Zeroizing<String>> {
        self.0
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(format!("encode secret key: {}", e)))
    }

    pub fn public_key(&self) -> ReceiverPublicKey {
        ReceiverPublicKey(self.0.public_key())
    }
}

impl fmt::Debug for ReceiverSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReceiverSecretKey(<redacted>)")
    }
}

/// Generate a fresh receiver keypair.
pub fn generate_receiver_keypair() -> (ReceiverSecretKey, ReceiverPublicKey) {
    let secret = ReceiverSecretKey(SecretKey::random(&mut OsRng));
    let public = secret.public_key();
    (secret, public)
}

/// Generate a keypair and write it as `<stem>-secret.pem` / `<stem>.pem`
/// under `dir`. Returns (secret path, public path).
pub fn write_receiver_keypair(dir: &Path, stem: &str) -> CryptoResult<(PathBuf, PathBuf)> {
    let (secret, public) = generate_receiver_keypair();
    let secret_path = dir.join(format!("{}-secret.pem", stem));
    let public_path = dir.join(format!("{}.pem", stem));

    write_key_file(&secret_path, secret.to_pem()?.as_bytes())?;
    write_key_file(&public_path, public.to_pem()?.as_bytes())?;
    Ok((secret_path, public_path))
}

// ==================== PAYLOAD ====================

/// The plaintext inside an envelope: the challenge in the clear and the
/// already AES-encrypted response.
///
/// Encoding: challenge length (u32 BE) || challenge || cipher-response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrpEnvelope {
    pub challenge: Vec<u8>,
    pub cipher_response: Vec<u8>,
}

impl CrpEnvelope {
    pub fn new(challenge: Vec<u8>, cipher_response: Vec<u8>) -> Self {
        CrpEnvelope {
            challenge,
            cipher_response,
        }
    }

    /// Fails when the challenge does not fit the u32 length prefix.
    pub fn encode(&self) -> CryptoResult<Vec<u8>> {
        let prefix = length_prefix(self.challenge.len())?;
        let mut out = Vec::with_capacity(4 + self.challenge.len() + self.cipher_response.len());
        out.extend_from_slice(&prefix);
        out.extend_from_slice(&self.challenge);
        out.extend_from_slice(&self.cipher_response);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < 4 {
            return Err(CryptoError::MalformedEnvelope(
                "payload shorter than its length prefix".to_string(),
            ));
        }
        let (prefix, rest) = bytes.split_at(4);
        let challenge_len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if challenge_len > rest.len() {
            return Err(CryptoError::MalformedEnvelope(format!(
                "challenge length {} exceeds payload of {} bytes",
                challenge_len,
                rest.len()
            )));
        }
        let (challenge, cipher_response) = rest.split_at(challenge_len);
        Ok(CrpEnvelope::new(challenge.to_vec(), cipher_response.to_vec()))
    }
}

fn length_prefix(len: usize) -> CryptoResult<[u8; 4]> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| CryptoError::Encryption(format!("challenge of {} bytes exceeds the u32 length prefix", len)))
}

/// Sealed bytes addressed to one receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope(Vec<u8>);

impl SealedEnvelope {
    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() < EPHEMERAL_KEY_LEN + NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedEnvelope(format!(
                "sealed envelope too short ({} bytes)",
                bytes.len()
            )));
        }
        Ok(SealedEnvelope(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

// ==================== SEAL / OPEN ====================

fn derive_envelope_key(
    shared_secret: &[u8],
    ephemeral_pub: &[u8],
    receiver_pub: &[u8],
) -> CryptoResult<Key<Aes256Gcm>> {
    let hk = Hkdf::<Sha256>::new(Some(ENVELOPE_DOMAIN), shared_secret);
    let mut info = Vec::with_capacity(ephemeral_pub.len() + receiver_pub.len());
    info.extend_from_slice(ephemeral_pub);
    info.extend_from_slice(receiver_pub);

    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(&info, &mut okm[..])
        .map_err(|_| CryptoError::Encryption("HKDF expand failed".to_string()))?;
    Ok(Key::<Aes256Gcm>::clone_from_slice(&okm[..]))
}

/// Seal arbitrary bytes for `receiver`.
pub fn seal(plaintext: &[u8], receiver: &ReceiverPublicKey) -> CryptoResult<SealedEnvelope> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_pub = ephemeral.public_key().to_encoded_point(true);
    let shared = ephemeral.diffie_hellman(&receiver.0);

    let key = derive_envelope_key(
        shared.raw_secret_bytes().as_slice(),
        ephemeral_pub.as_bytes(),
        &receiver.to_sec1_bytes(),
    )?;
    let cipher = Aes256Gcm::new(&key);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("AES-GCM seal failed: {}", e)))?;

    let mut out = Vec::with_capacity(EPHEMERAL_KEY_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    debug!("sealed {} plaintext bytes into {} byte envelope", plaintext.len(), out.len());
    Ok(SealedEnvelope(out))
}

/// Open an envelope with the receiver's secret key.
pub fn open(envelope: &SealedEnvelope, secret: &ReceiverSecretKey) -> CryptoResult<Vec<u8>> {
    let bytes = envelope.as_bytes();
    let (ephemeral_bytes, rest) = bytes.split_at(EPHEMERAL_KEY_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let ephemeral = PublicKey::from_sec1_bytes(ephemeral_bytes).map_err(|_| {
        CryptoError::MalformedEnvelope("ephemeral key is not a curve point".to_string())
    })?;
    let shared = diffie_hellman(secret.0.to_nonzero_scalar(), ephemeral.as_affine());

    let key = derive_envelope_key(
        shared.raw_secret_bytes().as_slice(),
        ephemeral_bytes,
        &secret.public_key().to_sec1_bytes(),
    )?;
    Aes256Gcm::new(&key)
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Decryption("envelope authentication failed".to_string()))
}

/// Seal a (challenge, cipher-response) pair.
pub fn seal_crp(payload: &CrpEnvelope, receiver: &ReceiverPublicKey) -> CryptoResult<SealedEnvelope> {
    seal(&payload.encode()?, receiver)
}

/// Open and decode a (challenge, cipher-response) pair.
pub fn open_crp(envelope: &SealedEnvelope, secret: &ReceiverSecretKey) -> CryptoResult<CrpEnvelope> {
    let plain = Zeroizing::new(open(envelope, secret)?);
    CrpEnvelope::decode(&plain)
}
