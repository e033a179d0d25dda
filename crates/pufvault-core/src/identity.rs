// Identity Deriver - tamper-evident shard identifiers
//
// SAFETY INVARIANTS:
// 1. ShardId is a pure function of (origin address, index, shard bytes)
// 2. DataId is a pure function of (challenge, cipher-response, ShardId)
// 3. Substituting the challenge, the encrypted response or the ShardId
//    changes the DataId recorded on the ledger
// 4. Digests are rendered as 64 lowercase hex characters everywhere

use crate::error::{CoreError, CoreResult};
use crate::fsio::{read_file, write_file};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Raw 256-bit digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest256([u8; 32]);

impl Digest256 {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Digest256(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> CoreResult<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| CoreError::InvalidArgument(format!("bad digest hex {:?}: {}", s, e)))?;
        Ok(Digest256(bytes))
    }
}

impl fmt::Display for Digest256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest256({})", self.to_hex())
    }
}

macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Digest256);

        impl $name {
            pub fn from_digest(digest: Digest256) -> Self {
                $name(digest)
            }

            pub fn digest(&self) -> &Digest256 {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                self.0.to_hex()
            }

            pub fn from_hex(s: &str) -> CoreResult<Self> {
                Digest256::from_hex(s).map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> CoreResult<Self> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

digest_id!(
    /// Content + origin binding of one shard.
    ShardId
);
digest_id!(
    /// Content + custody binding: challenge, encrypted response and ShardId.
    DataId
);

/// SHA-256 over `len(origin) u64 BE || origin || index u64 BE || shard`.
///
/// The length prefix keeps (origin, index) boundaries unambiguous, so
/// `("10.0.0.1", 23)` and `("10.0.0.12", 3)` never share an encoding.
pub fn compute_shard_id(origin: &str, index: u32, shard: &[u8]) -> ShardId {
    let mut hasher = Sha256::new();
    hasher.update((origin.len() as u64).to_be_bytes());
    hasher.update(origin.as_bytes());
    hasher.update(u64::from(index).to_be_bytes());
    hasher.update(shard);
    ShardId(Digest256(hasher.finalize().into()))
}

/// SHA-256 over `challenge || cipher_response || hex(shard_id)`.
pub fn compute_data_id(challenge: &[u8], cipher_response: &[u8], shard_id: &ShardId) -> DataId {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(cipher_response);
    hasher.update(shard_id.to_hex().as_bytes());
    DataId(Digest256(hasher.finalize().into()))
}

/// Outcome of re-deriving a stored identity from the artifacts it claims to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Intact,
    /// Shard bytes, origin or index differ from what the ShardId committed to.
    ShardTampered,
    /// Challenge or encrypted response differ from what the DataId committed to.
    DataTampered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardIdentity {
    pub shard_id: ShardId,
    pub data_id: DataId,
}

impl ShardIdentity {
    pub fn derive(
        origin: &str,
        index: u32,
        shard: &[u8],
        challenge: &[u8],
        cipher_response: &[u8],
    ) -> Self {
        let shard_id = compute_shard_id(origin, index, shard);
        let data_id = compute_data_id(challenge, cipher_response, &shard_id);
        ShardIdentity { shard_id, data_id }
    }

    pub fn verify(
        &self,
        origin: &str,
        index: u32,
        shard: &[u8],
        challenge: &[u8],
        cipher_response: &[u8],
    ) -> Verification {
        if compute_shard_id(origin, index, shard) != self.shard_id {
            return Verification::ShardTampered;
        }
        if compute_data_id(challenge, cipher_response, &self.shard_id) != self.data_id {
            return Verification::DataTampered;
        }
        Verification::Intact
    }
}

/// Persist a digest as its hex string.
pub fn write_sidecar(path: &Path, digest: &Digest256) -> CoreResult<()> {
    write_file(path, digest.to_hex().as_bytes())
}

pub fn read_sidecar(path: &Path) -> CoreResult<Digest256> {
    let raw = read_file(path)?;
    let text = std::str::from_utf8(&raw)
        .map_err(|_| CoreError::InvalidArgument(format!("{} is not UTF-8", path.display())))?;
    Digest256::from_hex(text)
}
