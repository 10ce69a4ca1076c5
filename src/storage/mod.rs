//! Cache storage tiers
//!
//! The local tier is a sharded directory tree owned by [`LocalStorage`].
//! Remote tiers implement [`secondary::SecondaryStorage`] and are consulted
//! only after a local miss.

mod evict;
mod local;
mod results;
pub mod secondary;
mod stats;

pub use evict::SweepReport;
pub use local::{LocalOptions, LocalStorage, OpenEntry, PutOutcome};
pub use results::{CompressionReport, RecompressReport};
pub use stats::{CacheStats, Counter, ShardStats, StatsSummary, STATS_FILE};

use crate::hash::Digest;
use std::fmt;

/// What a stored object is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Direct-mode manifest keyed by class digest
    Manifest,
    /// Compiler output keyed by content digest
    Result,
}

impl EntryKind {
    /// One-letter suffix used in file names and remote keys
    pub fn suffix(&self) -> char {
        match self {
            Self::Manifest => 'M',
            Self::Result => 'R',
        }
    }

    pub fn from_suffix(c: char) -> Option<Self> {
        match c {
            'M' => Some(Self::Manifest),
            'R' => Some(Self::Result),
            _ => None,
        }
    }
}

/// Address of an object in any tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub digest: Digest,
    pub kind: EntryKind,
}

impl CacheKey {
    pub fn manifest(digest: Digest) -> Self {
        Self {
            digest,
            kind: EntryKind::Manifest,
        }
    }

    pub fn result(digest: Digest) -> Self {
        Self {
            digest,
            kind: EntryKind::Result,
        }
    }

    /// Parse a stored file name back into a key
    pub fn from_file_name(name: &str) -> Option<Self> {
        let suffix = name.chars().last()?;
        let kind = EntryKind::from_suffix(suffix)?;
        let digest = name[..name.len() - 1].parse().ok()?;
        Some(Self { digest, kind })
    }
}

/// File name and remote key: `<digest><suffix>`
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.digest, self.kind.suffix())
    }
}
