//! Local filesystem tier
//!
//! Layout: `<root>/<h1>/<h2>/.../<digest><kind>` where `h1..hN` are the
//! leading hex digits of the digest, one directory per level. Blobs are
//! immutable once published; replacing one is a new file renamed over the
//! old. Manifests are replaced in place that way, results are written
//! once and never overwritten.

use super::evict::{self, Limits, SweepReport};
use super::stats::{CacheStats, Counter, SHARDS};
use super::{CacheKey, EntryKind};
use crate::atomic::AtomicWriter;
use crate::error::{StashError, StashResult};
use crate::lock::{self, LockGuard, LockOptions};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Shards the auto-cleanup divides the limits across
const SHARD_COUNT: u64 = SHARDS.len() as u64;

/// Settings for [`LocalStorage`]
#[derive(Debug, Clone)]
pub struct LocalOptions {
    pub root: PathBuf,
    /// Hex digits of the digest used as directory levels (1..=8)
    pub levels: usize,
    /// Size ceiling in bytes; 0 disables
    pub max_size: u64,
    /// File count ceiling; 0 disables
    pub max_files: u64,
    /// Sweeps stop at this fraction of the ceilings
    pub limit_multiple: f64,
    pub lock: LockOptions,
    /// Age after which an unfinished temporary counts as orphaned
    pub temp_max_age: Duration,
    /// Reads leave access times alone
    pub read_only: bool,
}

impl LocalOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            levels: 2,
            max_size: 0,
            max_files: 0,
            limit_multiple: 0.8,
            lock: LockOptions::default(),
            temp_max_age: Duration::from_secs(3600),
            read_only: false,
        }
    }

    fn limits(&self) -> Limits {
        Limits {
            max_size: self.max_size,
            max_files: self.max_files,
            limit_multiple: self.limit_multiple,
        }
    }

    fn shard_limits(&self) -> Limits {
        Limits {
            max_size: self.max_size / SHARD_COUNT,
            max_files: self.max_files / SHARD_COUNT,
            limit_multiple: self.limit_multiple,
        }
    }
}

/// Result of [`LocalStorage::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New object written
    Stored,
    /// An existing object was replaced (manifests)
    Replaced,
    /// An equal result was already present; nothing written
    AlreadyPresent,
}

type PinTable = Arc<Mutex<HashMap<PathBuf, usize>>>;

/// An entry open for reading. The sweep in this process will not unlink
/// it until this is dropped.
pub struct OpenEntry {
    file: File,
    path: PathBuf,
    pins: PinTable,
}

impl OpenEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(&mut self) -> StashResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.file
            .read_to_end(&mut buf)
            .map_err(|e| StashError::io(format!("reading {}", self.path.display()), e))?;
        Ok(buf)
    }
}

impl Drop for OpenEntry {
    fn drop(&mut self) {
        let mut pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = pins.get_mut(&self.path) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.path);
            }
        }
    }
}

/// Sharded on-disk cache
#[derive(Clone)]
pub struct LocalStorage {
    opts: LocalOptions,
    stats: CacheStats,
    pins: PinTable,
}

impl LocalStorage {
    pub fn new(opts: LocalOptions) -> StashResult<Self> {
        if !(1..=8).contains(&opts.levels) {
            return Err(StashError::invalid_config(format!(
                "cache levels must be 1..=8, got {}",
                opts.levels
            )));
        }
        if !(opts.limit_multiple > 0.0 && opts.limit_multiple <= 1.0) {
            return Err(StashError::invalid_config(format!(
                "limit multiple must be in (0, 1], got {}",
                opts.limit_multiple
            )));
        }
        let stats = CacheStats::new(&opts.root, opts.lock);
        Ok(Self {
            opts,
            stats,
            pins: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.opts.root
    }

    pub fn options(&self) -> &LocalOptions {
        &self.opts
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Where `key` lives on disk
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        let hex = key.digest.to_hex();
        let mut path = self.opts.root.clone();
        for c in hex.chars().take(self.opts.levels) {
            path.push(c.to_string());
        }
        path.push(key.to_string());
        path
    }

    /// Open an entry for reading, refreshing its access time unless the
    /// cache is read-only
    pub fn open(&self, key: &CacheKey) -> StashResult<Option<OpenEntry>> {
        let path = self.path_for(key);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StashError::io(format!("opening {}", path.display()), e)),
        };
        // Access time drives eviction order; failure only skews LRU.
        if !self.opts.read_only {
            if let Err(e) = file.set_modified(SystemTime::now()) {
                debug!("Could not touch {}: {}", path.display(), e);
            }
        }

        {
            let mut pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
            *pins.entry(path.clone()).or_insert(0) += 1;
        }
        Ok(Some(OpenEntry {
            file,
            path,
            pins: Arc::clone(&self.pins),
        }))
    }

    /// Read an entry's bytes
    pub fn get(&self, key: &CacheKey) -> StashResult<Option<Vec<u8>>> {
        match self.open(key)? {
            Some(mut entry) => entry.read_all().map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Take the per-entry lock, e.g. around a manifest read-modify-write
    pub fn lock(&self, key: &CacheKey) -> StashResult<LockGuard> {
        lock::acquire(&self.path_for(key), &self.opts.lock)
    }

    /// Store an entry, taking its lock for the duration of the write
    pub fn put(&self, key: &CacheKey, bytes: &[u8]) -> StashResult<PutOutcome> {
        let guard = self.lock(key)?;
        self.put_locked(key, bytes, &guard)
    }

    /// Store an entry while the caller holds its lock
    pub fn put_locked(
        &self,
        key: &CacheKey,
        bytes: &[u8],
        guard: &LockGuard,
    ) -> StashResult<PutOutcome> {
        let path = self.path_for(key);
        if guard.path() != lock::lock_path_for(&path) {
            return Err(StashError::Internal(format!(
                "lock {} does not guard {}",
                guard.path().display(),
                path.display()
            )));
        }

        let previous = std::fs::metadata(&path).ok().map(|m| m.len());
        if key.kind == EntryKind::Result && previous.is_some() {
            debug!("{} already stored", key);
            return Ok(PutOutcome::AlreadyPresent);
        }

        let mut writer = AtomicWriter::create(&path)?;
        writer
            .write_all(bytes)
            .map_err(|e| StashError::io(format!("writing {}", path.display()), e))?;

        let outcome = match key.kind {
            EntryKind::Manifest => {
                writer.commit()?;
                if previous.is_some() {
                    PutOutcome::Replaced
                } else {
                    PutOutcome::Stored
                }
            }
            EntryKind::Result => {
                if writer.commit_new()? {
                    PutOutcome::Stored
                } else {
                    PutOutcome::AlreadyPresent
                }
            }
        };

        if outcome != PutOutcome::AlreadyPresent {
            let size = bytes.len() as u64;
            let shard = CacheStats::shard_of(&key.digest);
            let mut over = false;
            let limits = self.opts.shard_limits();
            let updated = self.stats.update(shard, |s| {
                s.add_file(size, previous);
                over = limits.exceeded(s.size_bytes, s.files);
            });
            if let Err(e) = updated {
                debug!("Stats update for {} skipped: {}", key, e);
            }
            if over {
                self.auto_clean(shard);
            }
        }
        Ok(outcome)
    }

    /// Delete an entry; `false` if it was not there
    pub fn remove(&self, key: &CacheKey) -> StashResult<bool> {
        let path = self.path_for(key);
        let _guard = self.lock(key)?;
        let size = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StashError::io(format!("stat {}", path.display()), e)),
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StashError::io(format!("removing {}", path.display()), e)),
        }
        if let Err(e) = self
            .stats
            .update(CacheStats::shard_of(&key.digest), |s| s.remove_file(size))
        {
            debug!("Stats update for {} skipped: {}", key, e);
        }
        Ok(true)
    }

    /// Record a lookup event against the shard of `key`
    pub fn record(&self, key: &CacheKey, counter: Counter) {
        self.stats.bump(&key.digest, counter);
    }

    fn pinned(&self) -> Vec<PathBuf> {
        let pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        pins.keys().cloned().collect()
    }

    fn auto_clean(&self, shard: char) {
        let dir = self.opts.root.join(shard.to_string());
        match evict::sweep(
            &[(shard, dir)],
            &self.opts.shard_limits(),
            evict::Policy::ToLimits,
            &self.sweep_context(),
            &mut |_| {},
        ) {
            Ok(report) => info!(
                shard = %shard,
                removed = report.files_removed,
                "Shard over its share of the limits; cleaned"
            ),
            Err(e) => debug!("Auto cleanup of shard {} failed: {}", shard, e),
        }
    }

    fn sweep_context(&self) -> evict::SweepContext<'_> {
        evict::SweepContext {
            stats: &self.stats,
            pinned: self.pinned(),
            lock: self.opts.lock,
            temp_max_age: self.opts.temp_max_age,
        }
    }

    pub(super) fn shard_dirs(&self) -> Vec<(char, PathBuf)> {
        SHARDS
            .iter()
            .map(|&c| (c, self.opts.root.join(c.to_string())))
            .filter(|(_, dir)| dir.is_dir())
            .collect()
    }

    /// Bring the whole cache under its limits, oldest access first.
    ///
    /// `progress` is called with the number of files scanned so far.
    pub fn cleanup(&self, progress: &mut dyn FnMut(usize)) -> StashResult<SweepReport> {
        evict::sweep(
            &self.shard_dirs(),
            &self.opts.limits(),
            evict::Policy::ToLimits,
            &self.sweep_context(),
            progress,
        )
    }

    /// Remove every entry not accessed within `max_age`
    pub fn evict_older_than(
        &self,
        max_age: Duration,
        progress: &mut dyn FnMut(usize),
    ) -> StashResult<SweepReport> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        evict::sweep(
            &self.shard_dirs(),
            &self.opts.limits(),
            evict::Policy::OlderThan(cutoff),
            &self.sweep_context(),
            progress,
        )
    }

    /// Remove every entry
    pub fn clear(&self, progress: &mut dyn FnMut(usize)) -> StashResult<SweepReport> {
        evict::sweep(
            &self.shard_dirs(),
            &self.opts.limits(),
            evict::Policy::Everything,
            &self.sweep_context(),
            progress,
        )
    }
}
