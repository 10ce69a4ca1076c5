//! Per-shard statistics
//!
//! Each top-level shard directory holds a `stats.json` with event counters
//! and its approximate size and file count. Writers update it under the
//! shard's lock; readers aggregate without locking. Totals drift when
//! processes die between writing an entry and updating stats, and are
//! recomputed from the directory tree by every eviction sweep.

use crate::atomic::write_atomic;
use crate::error::StashResult;
use crate::hash::Digest;
use crate::lock::{self, LockOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const STATS_FILE: &str = "stats.json";

/// Top-level shard names
pub(crate) const SHARDS: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

/// Event counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    LocalHit,
    SecondaryHit,
    Miss,
    Error,
    SecondaryError,
    FilesEvicted,
    Cleanups,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    pub local_hit: u64,
    pub secondary_hit: u64,
    pub miss: u64,
    pub error: u64,
    pub secondary_error: u64,
    pub files_evicted: u64,
    pub cleanups: u64,
}

impl Counters {
    pub fn add(&mut self, counter: Counter, n: u64) {
        let slot = match counter {
            Counter::LocalHit => &mut self.local_hit,
            Counter::SecondaryHit => &mut self.secondary_hit,
            Counter::Miss => &mut self.miss,
            Counter::Error => &mut self.error,
            Counter::SecondaryError => &mut self.secondary_error,
            Counter::FilesEvicted => &mut self.files_evicted,
            Counter::Cleanups => &mut self.cleanups,
        };
        *slot = slot.saturating_add(n);
    }

    /// Fold another shard in; values come from disk and may be anything
    fn merge(&mut self, other: &Counters) {
        self.local_hit = self.local_hit.saturating_add(other.local_hit);
        self.secondary_hit = self.secondary_hit.saturating_add(other.secondary_hit);
        self.miss = self.miss.saturating_add(other.miss);
        self.error = self.error.saturating_add(other.error);
        self.secondary_error = self.secondary_error.saturating_add(other.secondary_error);
        self.files_evicted = self.files_evicted.saturating_add(other.files_evicted);
        self.cleanups = self.cleanups.saturating_add(other.cleanups);
    }
}

/// Contents of one shard's `stats.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardStats {
    pub counters: Counters,
    pub size_bytes: u64,
    pub files: u64,
    pub zeroed_at: Option<DateTime<Utc>>,
}

impl ShardStats {
    /// Account for a stored object; `replaced` is the size of what it overwrote
    pub fn add_file(&mut self, size: u64, replaced: Option<u64>) {
        match replaced {
            Some(old) => {
                self.size_bytes = self.size_bytes.saturating_sub(old).saturating_add(size);
            }
            None => {
                self.size_bytes = self.size_bytes.saturating_add(size);
                self.files = self.files.saturating_add(1);
            }
        }
    }

    pub fn remove_file(&mut self, size: u64) {
        self.size_bytes = self.size_bytes.saturating_sub(size);
        self.files = self.files.saturating_sub(1);
    }
}

/// Aggregate over all shards
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSummary {
    pub counters: Counters,
    pub size_bytes: u64,
    pub files: u64,
    /// Most recent reset across shards
    pub zeroed_at: Option<DateTime<Utc>>,
}

impl StatsSummary {
    /// Fraction of lookups served from either tier
    pub fn hit_rate(&self) -> Option<f64> {
        let hits = self.counters.local_hit as f64 + self.counters.secondary_hit as f64;
        let total = hits + self.counters.miss as f64;
        (total > 0.0).then(|| hits / total)
    }
}

/// Reader/writer for the per-shard stats files under a cache root
#[derive(Debug, Clone)]
pub struct CacheStats {
    root: PathBuf,
    lock: LockOptions,
}

impl CacheStats {
    pub fn new(root: impl Into<PathBuf>, lock: LockOptions) -> Self {
        Self {
            root: root.into(),
            lock,
        }
    }

    /// Shard that accounts for `digest`
    pub fn shard_of(digest: &Digest) -> char {
        digest.to_hex().chars().next().unwrap_or('0')
    }

    fn path(&self, shard: char) -> PathBuf {
        self.root.join(shard.to_string()).join(STATS_FILE)
    }

    /// Read one shard's stats without locking; damaged files read as empty
    pub fn load(&self, shard: char) -> ShardStats {
        read_stats(&self.path(shard))
    }

    /// Read-modify-write one shard's stats under its lock
    pub fn update(&self, shard: char, f: impl FnOnce(&mut ShardStats)) -> StashResult<()> {
        let path = self.path(shard);
        let _guard = lock::acquire(&path, &self.lock)?;
        let mut stats = read_stats(&path);
        f(&mut stats);
        write_atomic(&path, &serde_json::to_vec_pretty(&stats)?)
    }

    /// Bump a counter, logging instead of failing: counters are advisory
    pub fn bump(&self, digest: &Digest, counter: Counter) {
        if let Err(e) = self.update(Self::shard_of(digest), |s| s.counters.add(counter, 1)) {
            debug!("Stats update skipped: {}", e);
        }
    }

    /// Aggregate all shards, lock-free
    pub fn summary(&self) -> StatsSummary {
        let mut summary = StatsSummary::default();
        for shard in SHARDS {
            let s = self.load(shard);
            summary.counters.merge(&s.counters);
            summary.size_bytes = summary.size_bytes.saturating_add(s.size_bytes);
            summary.files = summary.files.saturating_add(s.files);
            summary.zeroed_at = summary.zeroed_at.max(s.zeroed_at);
        }
        summary
    }

    /// Reset counters in every shard; size and file totals are kept
    pub fn zero(&self) -> StashResult<()> {
        let now = Utc::now();
        for shard in SHARDS {
            if !self.root.join(shard.to_string()).is_dir() {
                continue;
            }
            self.update(shard, |s| {
                s.counters = Counters::default();
                s.zeroed_at = Some(now);
            })?;
        }
        Ok(())
    }
}

fn read_stats(path: &Path) -> ShardStats {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(_) => return ShardStats::default(),
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!("Ignoring damaged {}: {}", path.display(), e);
        ShardStats::default()
    })
}
