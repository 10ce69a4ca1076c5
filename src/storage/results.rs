//! Whole-cache passes over stored results
//!
//! Results are read through their blob header only when surveying, and
//! rewritten in place under their lock when recompressing. A rewrite keeps
//! the entry's access time so it does not disturb eviction order.

use super::local::LocalStorage;
use super::stats::CacheStats;
use super::{CacheKey, EntryKind};
use crate::atomic::AtomicWriter;
use crate::compression::{codec_name, decompress, peek_header, Compressor, HEADER_LEN};
use crate::error::{StashError, StashResult};
use crate::lock;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// How stored results are encoded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompressionReport {
    pub results: u64,
    pub compressed: u64,
    pub uncompressed: u64,
    pub unreadable: u64,
    /// Bytes on disk, headers included
    pub stored_bytes: u64,
    /// Bytes the readable results decode to
    pub original_bytes: u64,
}

impl CompressionReport {
    /// Original over stored size; `None` when nothing was readable
    pub fn ratio(&self) -> Option<f64> {
        (self.stored_bytes > 0 && self.original_bytes > 0)
            .then(|| self.original_bytes as f64 / self.stored_bytes as f64)
    }

    /// Fraction of the original size saved on disk
    pub fn savings(&self) -> Option<f64> {
        (self.original_bytes > 0)
            .then(|| 1.0 - self.stored_bytes as f64 / self.original_bytes as f64)
    }
}

/// What a recompression pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecompressReport {
    pub results: u64,
    pub rewritten: u64,
    pub unchanged: u64,
    pub skipped_damaged: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl LocalStorage {
    fn result_files(&self) -> Vec<(CacheKey, PathBuf)> {
        let mut out = Vec::new();
        for (_, dir) in self.shard_dirs() {
            for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let key = entry.file_name().to_str().and_then(CacheKey::from_file_name);
                if let Some(key) = key.filter(|k| k.kind == EntryKind::Result) {
                    out.push((key, entry.into_path()));
                }
            }
        }
        out
    }

    /// Survey how results are stored, reading only their headers.
    ///
    /// `progress` is called with the number of results examined so far.
    pub fn compression_report(
        &self,
        progress: &mut dyn FnMut(usize),
    ) -> StashResult<CompressionReport> {
        let mut report = CompressionReport::default();

        for (i, (_, path)) in self.result_files().into_iter().enumerate() {
            progress(i + 1);
            let (stored, header) = match read_header(&path) {
                Ok(Some(found)) => found,
                // Evicted while we were walking
                Ok(None) => continue,
                Err(e) => return Err(StashError::io(format!("reading {}", path.display()), e)),
            };
            report.results += 1;
            report.stored_bytes = report.stored_bytes.saturating_add(stored);

            let parsed = peek_header(&header)
                .ok()
                .and_then(|(tag, len)| codec_name(tag).map(|name| (name, len)));
            match parsed {
                Some(("none", len)) => {
                    report.uncompressed += 1;
                    report.original_bytes = report.original_bytes.saturating_add(len);
                }
                Some((_, len)) => {
                    report.compressed += 1;
                    report.original_bytes = report.original_bytes.saturating_add(len);
                }
                None => {
                    debug!("Unreadable result header: {}", path.display());
                    report.unreadable += 1;
                }
            }
        }
        Ok(report)
    }

    /// Re-encode every result with `compressor`.
    ///
    /// Each rewrite happens under the entry's lock and is published with a
    /// rename, so concurrent readers see either the old or the new blob.
    /// Damaged results are left for eviction.
    pub fn recompress(
        &self,
        compressor: Compressor,
        progress: &mut dyn FnMut(usize),
    ) -> StashResult<RecompressReport> {
        let mut report = RecompressReport::default();

        for (i, (key, path)) in self.result_files().into_iter().enumerate() {
            progress(i + 1);
            let _guard = lock::acquire(&path, &self.options().lock)?;

            let old = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StashError::io(format!("reading {}", path.display()), e)),
            };
            report.results += 1;
            report.bytes_before = report.bytes_before.saturating_add(old.len() as u64);

            let data = match decompress(&old) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Skipping damaged result {}: {}", key, e);
                    report.skipped_damaged += 1;
                    report.bytes_after = report.bytes_after.saturating_add(old.len() as u64);
                    continue;
                }
            };
            let new = compressor.compress(&data)?;
            if new == old {
                report.unchanged += 1;
                report.bytes_after = report.bytes_after.saturating_add(old.len() as u64);
                continue;
            }

            let accessed = fs::metadata(&path).and_then(|m| m.modified()).ok();
            let mut writer = AtomicWriter::create(&path)?;
            writer
                .write_all(&new)
                .map_err(|e| StashError::io(format!("writing {}", path.display()), e))?;
            writer.commit()?;
            if let Some(t) = accessed {
                let kept = File::options()
                    .write(true)
                    .open(&path)
                    .and_then(|f| f.set_modified(t));
                if let Err(e) = kept {
                    debug!("Keeping access time of {} failed: {}", path.display(), e);
                }
            }

            let (old_len, new_len) = (old.len() as u64, new.len() as u64);
            let shard = CacheStats::shard_of(&key.digest);
            if let Err(e) = self.stats().update(shard, |s| s.add_file(new_len, Some(old_len))) {
                debug!("Stats update for {} skipped: {}", key, e);
            }
            report.rewritten += 1;
            report.bytes_after = report.bytes_after.saturating_add(new_len);
        }
        Ok(report)
    }
}

/// File size and leading bytes; `None` if the file is gone
fn read_header(path: &Path) -> io::Result<Option<(u64, Vec<u8>)>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let size = file.metadata()?.len();
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64).read_to_end(&mut header)?;
    Ok(Some((size, header)))
}

#[cfg(test)]
mod tests {
    use super::super::LocalOptions;
    use super::*;
    use crate::hash::{hash_bytes, HashAlgorithm};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn storage(tmp: &TempDir) -> LocalStorage {
        LocalStorage::new(LocalOptions::new(tmp.path())).unwrap()
    }

    fn object(seed: u32) -> Vec<u8> {
        let mut v = b"\x7fELF".to_vec();
        for i in 0..2048u32 {
            v.extend_from_slice(&((i + seed) % 61).to_le_bytes());
        }
        v
    }

    fn store(s: &LocalStorage, data: &[u8], compressor: Compressor) -> CacheKey {
        let key = CacheKey::result(hash_bytes(HashAlgorithm::Xxh3, data));
        s.put(&key, &compressor.compress(data).unwrap()).unwrap();
        key
    }

    #[test]
    fn report_counts_codecs_and_sizes() {
        let tmp = TempDir::new().unwrap();
        let s = storage(&tmp);
        store(&s, &object(1), Compressor::zstd(3).unwrap());
        store(&s, &object(2), Compressor::None);
        let manifest = CacheKey::manifest(hash_bytes(HashAlgorithm::Xxh3, b"m"));
        s.put(&manifest, b"not a result").unwrap();
        let broken = CacheKey::result(hash_bytes(HashAlgorithm::Xxh3, b"broken"));
        s.put(&broken, &[9, 9]).unwrap();

        let mut seen = 0;
        let report = s.compression_report(&mut |n| seen = n).unwrap();
        assert_eq!(seen, 3);
        assert_eq!(report.results, 3);
        assert_eq!(report.compressed, 1);
        assert_eq!(report.uncompressed, 1);
        assert_eq!(report.unreadable, 1);
        assert_eq!(report.original_bytes, 2 * object(1).len() as u64);
        assert!(report.stored_bytes < report.original_bytes);
        assert!(report.ratio().unwrap() > 1.0);
        assert!(report.savings().unwrap() > 0.0);
    }

    #[test]
    fn empty_cache_has_no_ratio() {
        let tmp = TempDir::new().unwrap();
        let report = storage(&tmp).compression_report(&mut |_| {}).unwrap();
        assert_eq!(report, CompressionReport::default());
        assert_eq!(report.ratio(), None);
        assert_eq!(report.savings(), None);
    }

    #[test]
    fn recompress_rewrites_and_keeps_access_time() {
        let tmp = TempDir::new().unwrap();
        let s = storage(&tmp);
        let data = object(5);
        let key = store(&s, &data, Compressor::None);
        let path = s.path_for(&key);
        let accessed = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(accessed).unwrap();
        drop(file);
        let before = s.stats().summary().size_bytes;

        let report = s.recompress(Compressor::zstd(5).unwrap(), &mut |_| {}).unwrap();
        assert_eq!(report.results, 1);
        assert_eq!(report.rewritten, 1);
        assert!(report.bytes_after < report.bytes_before);

        let stored = fs::read(&path).unwrap();
        assert_eq!(codec_name(stored[0]), Some("zstd"));
        assert_eq!(decompress(&stored).unwrap(), data);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), accessed);
        let after = s.stats().summary().size_bytes;
        assert_eq!(after, before - report.bytes_before + report.bytes_after);
        assert_eq!(s.stats().summary().files, 1);
        assert!(!lock::lock_path_for(&path).exists());
    }

    #[test]
    fn recompress_to_same_codec_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let s = storage(&tmp);
        store(&s, &object(7), Compressor::zstd(1).unwrap());

        let report = s.recompress(Compressor::zstd(1).unwrap(), &mut |_| {}).unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.rewritten, 0);
        assert_eq!(report.bytes_before, report.bytes_after);
    }

    #[test]
    fn recompress_leaves_damaged_results() {
        let tmp = TempDir::new().unwrap();
        let s = storage(&tmp);
        let broken = CacheKey::result(hash_bytes(HashAlgorithm::Xxh3, b"broken"));
        s.put(&broken, &[1, 200, 0, 0, 0, 0, 0, 0, 0, 1, 2]).unwrap();
        let good = store(&s, &object(9), Compressor::zstd(1).unwrap());

        let report = s.recompress(Compressor::None, &mut |_| {}).unwrap();
        assert_eq!(report.skipped_damaged, 1);
        assert_eq!(report.rewritten, 1);
        assert_eq!(s.get(&broken).unwrap().unwrap(), vec![1, 200, 0, 0, 0, 0, 0, 0, 0, 1, 2]);
        let stored = s.get(&good).unwrap().unwrap();
        assert_eq!(codec_name(stored[0]), Some("none"));
    }
}
