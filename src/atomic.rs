//! Safe-replace file writes
//!
//! Writes land in a temporary file next to the target and are renamed into
//! place on [`AtomicWriter::commit`]. Readers see either the old content or
//! the new content, never a mix. Dropping the writer without committing
//! removes the temporary and leaves the target untouched.

use crate::error::{StashError, StashResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Prefix of every temporary created by [`AtomicWriter`]
pub const TEMP_PREFIX: &str = ".tmp.";

/// Whether a file name belongs to an in-flight or orphaned temporary
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Scoped writer that publishes its content with a rename
pub struct AtomicWriter {
    target: PathBuf,
    temp: NamedTempFile,
}

impl AtomicWriter {
    /// Start a write to `target`, creating its parent directory if needed
    pub fn create(target: impl Into<PathBuf>) -> StashResult<Self> {
        let target = target.into();
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .map_err(|e| StashError::io(format!("creating {}", parent.display()), e))?;

        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&parent)
            .map_err(|e| StashError::io(format!("creating temporary in {}", parent.display()), e))?;

        Ok(Self { target, temp })
    }

    /// Final path this writer publishes to
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Publish the temporary onto the target, replacing any existing file
    pub fn commit(mut self) -> StashResult<()> {
        self.flush_temp()?;
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| StashError::io(format!("renaming onto {}", target.display()), e.error))?;
        Ok(())
    }

    /// Publish only if the target does not exist yet.
    ///
    /// Returns `false` when another writer got there first; the temporary
    /// is discarded in that case.
    pub fn commit_new(mut self) -> StashResult<bool> {
        self.flush_temp()?;
        let target = self.target;
        match self.temp.persist_noclobber(&target) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!("{} already present, discarding write", target.display());
                Ok(false)
            }
            Err(e) => Err(StashError::io(
                format!("linking onto {}", target.display()),
                e.error,
            )),
        }
    }

    /// Discard the write explicitly
    pub fn abort(self) {
        drop(self);
    }

    fn flush_temp(&mut self) -> StashResult<()> {
        self.temp
            .as_file_mut()
            .flush()
            .map_err(|e| StashError::io(format!("flushing write to {}", self.target.display()), e))
    }
}

impl Write for AtomicWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.temp.flush()
    }
}

/// Write `bytes` to `target` atomically, replacing it
pub fn write_atomic(target: &Path, bytes: &[u8]) -> StashResult<()> {
    let mut writer = AtomicWriter::create(target)?;
    writer
        .write_all(bytes)
        .map_err(|e| StashError::io(format!("writing {}", target.display()), e))?;
    writer.commit()
}

/// Remove temporaries under `dir` older than `max_age`.
///
/// Temporaries are left behind when a writer is killed mid-write. Young
/// ones may belong to a live writer and are kept.
pub fn cleanup_orphans(dir: &Path, max_age: Duration) -> StashResult<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !is_temp_name(name) {
            continue;
        }
        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| now.duration_since(t).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Removed orphaned temporary {}", entry.path().display());
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }

    Ok(removed)
}
