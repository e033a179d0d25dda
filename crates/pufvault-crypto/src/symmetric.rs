//! Symmetric stage: AES-128-CBC with PKCS#7 padding.
//!
//! The PUF response is the authentication secret, so it only ever leaves
//! this module encrypted. Every encryption draws a fresh IV which is
//! prefixed to the output.
//!
//! Wire format: iv (16 bytes) || ciphertext (multiple of 16 bytes)

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{read_key_file, write_key_file};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Per-shard key length in bytes (AES-128).
pub const KEY_LEN: usize = 16;

/// CBC initialisation vector length, equal to the AES block size.
pub const IV_LEN: usize = 16;

const BLOCK_LEN: usize = 16;

/// A 128-bit per-shard key. Wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Build a key from raw bytes.
    ///
    /// Key files are often written by hand, so a trailing `\n` or `\r\n`
    /// is stripped before the length check.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let candidate = if bytes.len() == KEY_LEN {
            bytes
        } else {
            trim_line_ending(bytes)
        };
        let key: [u8; KEY_LEN] = candidate.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "symmetric key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(SymmetricKey(key))
    }

    /// Draw a fresh key from the OS RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        SymmetricKey(key)
    }

    pub fn load(path: &Path) -> CryptoResult<Self> {
        let bytes = read_key_file(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn write(&self, path: &Path) -> CryptoResult<()> {
        write_key_file(path, &self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

fn trim_line_ending(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

/// Encrypt with a random IV. Returns `iv || ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> CryptoResult<Vec<u8>> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    encrypt_with_iv(plaintext, key, &iv)
}

/// Encrypt with a caller-chosen IV. Only deterministic fixtures should
/// need this; production paths go through [`encrypt`].
pub fn encrypt_with_iv(
    plaintext: &[u8],
    key: &SymmetricKey,
    iv: &[u8; IV_LEN],
) -> CryptoResult<Vec<u8>> {
    let encryptor = Aes128CbcEnc::new_from_slices(&key.0, iv)
        .map_err(|e| CryptoError::Encryption(format!("cipher init failed: {}", e)))?;
    let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt `iv || ciphertext` produced by [`encrypt`].
pub fn decrypt(ciphertext: &[u8], key: &SymmetricKey) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() < IV_LEN + BLOCK_LEN {
        return Err(CryptoError::Decryption(format!(
            "ciphertext too short ({} bytes)",
            ciphertext.len()
        )));
    }
    let (iv, body) = ciphertext.split_at(IV_LEN);
    if body.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::Decryption(format!(
            "ciphertext body of {} bytes is not block aligned",
            body.len()
        )));
    }

    let decryptor = Aes128CbcDec::new_from_slices(&key.0, iv)
        .map_err(|e| CryptoError::Decryption(format!("cipher init failed: {}", e)))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| CryptoError::Decryption("bad padding (wrong key or corrupted data)".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(byte: u8) -> SymmetricKey {
        SymmetricKey::from_bytes(&[byte; KEY_LEN]).unwrap()
    }

    #[test]
    fn test_roundtrip_encrypt_decrypt() {
        let k = key(0x42);
        let plain = b"response shard 0 of a 128-bit PUF";

        let cipher = encrypt(plain, &k).unwrap();
        // iv + padded body
        assert_eq!(cipher.len(), IV_LEN + 48);
        assert_eq!(decrypt(&cipher, &k).unwrap(), plain);
    }

    #[test]
    fn test_block_aligned_plaintext_gets_full_padding_block() {
        let k = key(1);
        let cipher = encrypt(&[0u8; 32], &k).unwrap();
        assert_eq!(cipher.len(), IV_LEN + 48);
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let k = key(9);
        let a = encrypt(b"same input", &k).unwrap();
        let b = encrypt(b"same input", &k).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fixed_iv_is_deterministic() {
        let k = key(3);
        let iv = [5u8; IV_LEN];
        assert_eq!(
            encrypt_with_iv(b"fixture", &k, &iv).unwrap(),
            encrypt_with_iv(b"fixture", &k, &iv).unwrap()
        );
    }

    #[test]
    fn test_wrong_key_does_not_recover_plaintext() {
        let plain = b"the response must stay secret".to_vec();
        let cipher = encrypt(&plain, &key(1)).unwrap();

        match decrypt(&cipher, &key(2)) {
            Ok(recovered) => assert_ne!(recovered, plain),
            Err(e) => assert!(matches!(e, CryptoError::Decryption(_))),
        }
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let k = key(4);
        assert!(decrypt(&[0u8; 20], &k).is_err());
        assert!(decrypt(&[0u8; IV_LEN + 17], &k).is_err());
    }

    #[test]
    fn test_key_file_with_newline_is_accepted() {
        let mut raw = b"0123456789abcdef".to_vec();
        raw.extend_from_slice(b"\r\n");
        let k = SymmetricKey::from_bytes(&raw).unwrap();
        assert_eq!(k.as_bytes(), b"0123456789abcdef");
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        assert!(matches!(
            SymmetricKey::from_bytes(b"short"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", key(0x61));
        assert!(!rendered.contains("97"));
        assert!(rendered.contains("redacted"));
    }

    proptest! {
        #[test]
        fn prop_decrypt_inverts_encrypt(data in proptest::collection::vec(any::<u8>(), 0..512), seed in any::<u8>()) {
            let k = key(seed);
            let cipher = encrypt(&data, &k).unwrap();
            prop_assert_eq!(decrypt(&cipher, &k).unwrap(), data);
        }
    }
}
