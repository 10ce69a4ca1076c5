//! Eviction sweeps
//!
//! A sweep scans shard directories, picks victims according to a policy
//! and unlinks them. Files are never truncated, so a reader in another
//! process keeps a valid descriptor; entries pinned by this process are
//! skipped. Afterwards each shard's size and file count in `stats.json`
//! are overwritten with what the scan found.

use super::stats::{CacheStats, Counter, STATS_FILE};
use crate::atomic::{cleanup_orphans, is_temp_name};
use crate::error::StashResult;
use crate::lock::{self, is_lock_name, LockOptions};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Size and count ceilings with the hysteresis fraction sweeps stop at
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub max_size: u64,
    pub max_files: u64,
    pub limit_multiple: f64,
}

impl Limits {
    pub fn exceeded(&self, size: u64, files: u64) -> bool {
        (self.max_size > 0 && size > self.max_size) || (self.max_files > 0 && files > self.max_files)
    }

    fn target(limit: u64, multiple: f64) -> u64 {
        if limit == 0 {
            u64::MAX
        } else {
            (limit as f64 * multiple) as u64
        }
    }

    fn satisfied(&self, size: u64, files: u64) -> bool {
        size <= Self::target(self.max_size, self.limit_multiple)
            && files <= Self::target(self.max_files, self.limit_multiple)
    }
}

/// Which entries a sweep removes
#[derive(Debug, Clone, Copy)]
pub(crate) enum Policy {
    /// Oldest access first, only when over a ceiling
    ToLimits,
    /// Everything last accessed before the cutoff
    OlderThan(SystemTime),
    /// Everything
    Everything,
}

pub(crate) struct SweepContext<'a> {
    pub stats: &'a CacheStats,
    pub pinned: Vec<PathBuf>,
    pub lock: LockOptions,
    pub temp_max_age: Duration,
}

/// What a sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub files_scanned: u64,
    pub bytes_scanned: u64,
    pub files_removed: u64,
    pub bytes_removed: u64,
    pub files_skipped_in_use: u64,
    pub temps_removed: u64,
    pub locks_removed: u64,
    pub files_remaining: u64,
    pub bytes_remaining: u64,
}

struct Candidate {
    shard: char,
    path: PathBuf,
    size: u64,
    accessed: SystemTime,
}

fn is_bookkeeping(name: &str) -> bool {
    name == STATS_FILE || is_lock_name(name) || is_temp_name(name)
}

fn scan(shard: char, dir: &Path, out: &mut Vec<Candidate>) {
    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(is_bookkeeping) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        out.push(Candidate {
            shard,
            path: entry.into_path(),
            size: meta.len(),
            accessed: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
}

pub(crate) fn sweep(
    shards: &[(char, PathBuf)],
    limits: &Limits,
    policy: Policy,
    ctx: &SweepContext<'_>,
    progress: &mut dyn FnMut(usize),
) -> StashResult<SweepReport> {
    let mut report = SweepReport::default();
    let mut candidates = Vec::new();

    for (shard, dir) in shards {
        report.temps_removed += cleanup_orphans(dir, ctx.temp_max_age)? as u64;
        report.locks_removed += lock::reclaim_stale(dir, ctx.lock.stale_after) as u64;
        scan(*shard, dir, &mut candidates);
        progress(candidates.len());
    }

    report.files_scanned = candidates.len() as u64;
    report.bytes_scanned = candidates.iter().map(|c| c.size).sum();

    let victims: Vec<usize> = match policy {
        Policy::Everything => (0..candidates.len()).collect(),
        Policy::OlderThan(cutoff) => (0..candidates.len())
            .filter(|&i| candidates[i].accessed < cutoff)
            .collect(),
        Policy::ToLimits => {
            if !limits.exceeded(report.bytes_scanned, report.files_scanned) {
                Vec::new()
            } else {
                let mut order: Vec<usize> = (0..candidates.len()).collect();
                order.sort_by_key(|&i| candidates[i].accessed);
                order
            }
        }
    };

    let pinned: HashSet<&Path> = ctx.pinned.iter().map(PathBuf::as_path).collect();
    let mut size = report.bytes_scanned;
    let mut files = report.files_scanned;
    let mut removed = vec![false; candidates.len()];

    for i in victims {
        if matches!(policy, Policy::ToLimits) && limits.satisfied(size, files) {
            break;
        }
        let c = &candidates[i];
        if pinned.contains(c.path.as_path()) {
            debug!("Skipping {}: open in this process", c.path.display());
            report.files_skipped_in_use += 1;
            continue;
        }
        match std::fs::remove_file(&c.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Some platforms refuse to unlink open files; leave it for next time.
                warn!("Could not evict {}: {}", c.path.display(), e);
                continue;
            }
        }
        removed[i] = true;
        size -= c.size;
        files -= 1;
        report.files_removed += 1;
        report.bytes_removed += c.size;
    }

    report.files_remaining = files;
    report.bytes_remaining = size;

    reconcile(shards, &candidates, &removed, ctx.stats);

    if report.files_removed > 0 {
        info!(
            removed = report.files_removed,
            bytes = report.bytes_removed,
            remaining = report.files_remaining,
            "Eviction sweep finished"
        );
    }
    Ok(report)
}

/// Overwrite each swept shard's totals with what is actually on disk
fn reconcile(
    shards: &[(char, PathBuf)],
    candidates: &[Candidate],
    removed: &[bool],
    stats: &CacheStats,
) {
    let mut per_shard: HashMap<char, (u64, u64, u64)> =
        shards.iter().map(|(s, _)| (*s, (0, 0, 0))).collect();
    for (c, gone) in candidates.iter().zip(removed) {
        let slot = per_shard.entry(c.shard).or_default();
        if *gone {
            slot.2 += 1;
        } else {
            slot.0 += c.size;
            slot.1 += 1;
        }
    }

    for (shard, (size, files, evicted)) in per_shard {
        let result = stats.update(shard, |s| {
            s.size_bytes = size;
            s.files = files;
            if evicted > 0 {
                s.counters.add(Counter::FilesEvicted, evicted);
                s.counters.add(Counter::Cleanups, 1);
            }
        });
        if let Err(e) = result {
            debug!("Could not reconcile stats for shard {}: {}", shard, e);
        }
    }
}
