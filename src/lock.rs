//! Cross-process lock files
//!
//! Processes sharing a cache directory coordinate through `<path>.lock`
//! files holding an exclusive OS file lock. The operating system drops the
//! lock when its holder exits, so a killed writer never blocks the others.
//! A holder unlinks its lock file before unlocking it; lock files left
//! behind by a crash are swept once older than the stale threshold.

use crate::error::{StashError, StashResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Suffix appended to the guarded path
pub const LOCK_SUFFIX: &str = ".lock";

/// Default age after which an unheld lock file is swept
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2);

/// Default time to wait for a contended lock
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const MIN_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// Attempts per acquisition when the file we locked was just unlinked
const RELINK_ATTEMPTS: usize = 3;

/// Lock timing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub stale_after: Duration,
    pub timeout: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Lock file path for a guarded path
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(LOCK_SUFFIX);
    PathBuf::from(os)
}

/// Whether a file name is a lock file
pub fn is_lock_name(name: &str) -> bool {
    name.ends_with(LOCK_SUFFIX)
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Path of the lock file itself
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Unlink while still locked; waiters holding the old inode notice.
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove lock {}: {}", self.path.display(), e);
            }
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Unlocking {}: {}", self.path.display(), e);
        }
    }
}

/// Acquire the lock guarding `path`, waiting up to `opts.timeout`
pub fn acquire(path: &Path, opts: &LockOptions) -> StashResult<LockGuard> {
    let lock_path = lock_path_for(path);
    let start = Instant::now();
    let mut backoff = MIN_BACKOFF;

    loop {
        if let Some(guard) = try_acquire_at(&lock_path)? {
            return Ok(guard);
        }

        if start.elapsed() >= opts.timeout {
            return Err(StashError::Timeout {
                what: format!("lock {}", lock_path.display()),
                waited: start.elapsed(),
            });
        }

        std::thread::sleep(backoff);
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Single acquisition attempt; `None` when another holder has the lock
pub fn try_acquire(path: &Path) -> StashResult<Option<LockGuard>> {
    try_acquire_at(&lock_path_for(path))
}

fn try_acquire_at(lock_path: &Path) -> StashResult<Option<LockGuard>> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StashError::io(format!("creating {}", parent.display()), e))?;
    }

    for _ in 0..RELINK_ATTEMPTS {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| StashError::io(format!("opening {}", lock_path.display()), e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(None),
            Err(e) => {
                return Err(StashError::io(format!("locking {}", lock_path.display()), e))
            }
        }

        // The previous holder released and unlinked it after our open.
        if unlinked(&file, lock_path) {
            let _ = FileExt::unlock(&file);
            continue;
        }

        // Holder pid, for whoever inspects a lock file by hand
        let _ = file.set_len(0).and_then(|()| writeln!(file, "{}", std::process::id()));
        debug!("Acquired {}", lock_path.display());
        return Ok(Some(LockGuard {
            file,
            path: lock_path.to_path_buf(),
        }));
    }
    Ok(None)
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn unlinked(file: &File, _path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    file.metadata().map(|m| m.nlink() == 0).unwrap_or(true)
}

#[cfg(not(unix))]
fn unlinked(_file: &File, path: &Path) -> bool {
    !path.exists()
}

/// Remove an unheld lock file older than `stale_after`
fn remove_if_stale(lock_path: &Path, stale_after: Duration) -> bool {
    let age = fs::metadata(lock_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok());
    match age {
        Some(age) if age >= stale_after => {}
        _ => return false,
    }

    let Ok(file) = OpenOptions::new().read(true).write(true).open(lock_path) else {
        return false;
    };
    if file.try_lock_exclusive().is_err() {
        return false;
    }
    let removed = !unlinked(&file, lock_path) && fs::remove_file(lock_path).is_ok();
    let _ = FileExt::unlock(&file);
    if removed {
        debug!("Removed leftover lock {}", lock_path.display());
    }
    removed
}

/// Remove leftover lock files under `dir`; used by cleanup sweeps
pub fn reclaim_stale(dir: &Path, stale_after: Duration) -> usize {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().is_some_and(is_lock_name))
        .filter(|e| remove_if_stale(e.path(), stale_after))
        .count()
}
