//! Fixed-size digest type and its canonical string form

use crate::error::{StashError, StashResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest digest produced by any supported algorithm
pub const MAX_DIGEST_LEN: usize = 32;

/// Hash algorithm used to produce a digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// XXH3-128, the legacy 128-bit fingerprint
    #[default]
    Xxh3,
    /// SHA-256, the extended 256-bit fingerprint
    Sha256,
}

impl HashAlgorithm {
    /// Number of digest bytes this algorithm produces
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Xxh3 => 16,
            Self::Sha256 => 32,
        }
    }

    /// Short tag appended to the string form of a digest
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Xxh3 => "xxh3",
            Self::Sha256 => "sha256",
        }
    }

    /// Single-byte identifier used in binary formats
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Xxh3 => 1,
            Self::Sha256 => 2,
        }
    }

    /// Inverse of [`HashAlgorithm::to_byte`]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Xxh3),
            2 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Parse from the tag used in digest strings and configuration
    pub fn from_tag(s: &str) -> Option<Self> {
        match s {
            "xxh3" => Some(Self::Xxh3),
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// An immutable content fingerprint.
///
/// Equality is byte-wise; digests from different algorithms have
/// different lengths and tags and therefore never compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: HashAlgorithm,
    bytes: [u8; MAX_DIGEST_LEN],
}

impl Digest {
    /// Build a digest from raw bytes, checking the length against the algorithm
    pub fn from_parts(algorithm: HashAlgorithm, raw: &[u8]) -> StashResult<Self> {
        if raw.len() != algorithm.digest_len() {
            return Err(StashError::corrupt(format!(
                "{} digest must be {} bytes, got {}",
                algorithm,
                algorithm.digest_len(),
                raw.len()
            )));
        }
        let mut bytes = [0u8; MAX_DIGEST_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self { algorithm, bytes })
    }

    /// Hasher output is always the algorithm's length
    pub(super) fn from_hasher(algorithm: HashAlgorithm, raw: &[u8]) -> Self {
        let mut bytes = [0u8; MAX_DIGEST_LEN];
        let len = algorithm.digest_len().min(raw.len());
        bytes[..len].copy_from_slice(&raw[..len]);
        Self { algorithm, bytes }
    }

    /// The algorithm that produced this digest
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The digest bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.algorithm.digest_len()]
    }

    /// Lowercase hex of the digest bytes, without the algorithm tag
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.to_hex(), self.algorithm.tag())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest({:02x}{:02x}{:02x}{:02x}..-{})",
            self.bytes[0],
            self.bytes[1],
            self.bytes[2],
            self.bytes[3],
            self.algorithm.tag()
        )
    }
}

impl FromStr for Digest {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hex_part, tag) = s
            .rsplit_once('-')
            .ok_or_else(|| StashError::corrupt(format!("digest {s:?} has no algorithm tag")))?;
        let algorithm = HashAlgorithm::from_tag(tag)
            .ok_or_else(|| StashError::corrupt(format!("unknown digest algorithm {tag:?}")))?;
        if hex_part.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(StashError::corrupt(format!("digest {s:?} is not lowercase")));
        }
        let raw = hex::decode(hex_part)
            .map_err(|e| StashError::corrupt(format!("digest {s:?} is not hex: {e}")))?;
        Self::from_parts(algorithm, &raw)
    }
}

impl Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
