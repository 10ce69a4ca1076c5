//! Header file fingerprints

use crate::hash::{hash_file, Digest, HashAlgorithm};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

/// State of one header file as recorded at compile time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileFingerprint {
    pub path: String,
    pub size: u64,
    pub digest: Digest,
}

impl FileFingerprint {
    pub fn new(path: impl Into<String>, size: u64, digest: Digest) -> Self {
        Self {
            path: path.into(),
            size,
            digest,
        }
    }
}

/// Derives fingerprints from live filesystem state
pub trait Fingerprinter {
    /// Current fingerprint of `path`, or `None` if it cannot be derived
    fn fingerprint(&mut self, path: &str) -> Option<FileFingerprint>;

    /// Whether `recorded` still describes the file on disk
    fn matches(&mut self, recorded: &FileFingerprint) -> bool {
        self.fingerprint(&recorded.path).as_ref() == Some(recorded)
    }
}

/// Stat + content-hash fingerprinter.
///
/// Results are memoised for the lifetime of the value, so a header shared
/// by many manifest entries is read once per lookup. Create a fresh one per
/// compilation.
pub struct ContentFingerprinter {
    algorithm: HashAlgorithm,
    compile_started: Option<SystemTime>,
    sizes: HashMap<String, Option<u64>>,
    digests: HashMap<String, Option<Digest>>,
}

impl ContentFingerprinter {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            compile_started: None,
            sizes: HashMap::new(),
            digests: HashMap::new(),
        }
    }

    /// Refuse files modified at or after `started`.
    ///
    /// A header edited while the compiler was reading it may not match
    /// what the compiler saw, so it must not be recorded.
    pub fn reject_newer_than(mut self, started: SystemTime) -> Self {
        self.compile_started = Some(started);
        self
    }

    /// Fingerprint every path, or `None` if any one of them cannot be recorded
    pub fn record_all<'a>(
        &mut self,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> Option<Vec<FileFingerprint>> {
        paths.into_iter().map(|p| self.fingerprint(p)).collect()
    }

    fn size_of(&mut self, path: &str) -> Option<u64> {
        if let Some(cached) = self.sizes.get(path) {
            return *cached;
        }
        let size = self.stat(path);
        self.sizes.insert(path.to_string(), size);
        size
    }

    fn stat(&self, path: &str) -> Option<u64> {
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        if let (Some(started), Ok(modified)) = (self.compile_started, meta.modified()) {
            if modified >= started {
                debug!("{} is too new to record", path);
                return None;
            }
        }
        Some(meta.len())
    }

    fn digest_of(&mut self, path: &str) -> Option<Digest> {
        if let Some(cached) = self.digests.get(path) {
            return *cached;
        }
        let digest = match hash_file(self.algorithm, Path::new(path)) {
            Ok(d) => Some(d),
            Err(e) => {
                debug!("Cannot fingerprint {}: {}", path, e);
                None
            }
        };
        self.digests.insert(path.to_string(), digest);
        digest
    }
}

impl Fingerprinter for ContentFingerprinter {
    fn fingerprint(&mut self, path: &str) -> Option<FileFingerprint> {
        let size = self.size_of(path)?;
        let digest = self.digest_of(path)?;
        Some(FileFingerprint::new(path, size, digest))
    }

    fn matches(&mut self, recorded: &FileFingerprint) -> bool {
        // Size mismatch settles it without reading the file.
        if self.size_of(&recorded.path) != Some(recorded.size) {
            return false;
        }
        if recorded.digest.algorithm() != self.algorithm {
            return false;
        }
        self.digest_of(&recorded.path) == Some(recorded.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn fingerprint_reflects_content() {
        let tmp = TempDir::new().unwrap();
        let h = write(&tmp, "a.h", b"#define A 1\n");

        let mut f = ContentFingerprinter::new(HashAlgorithm::Xxh3);
        let fp = f.fingerprint(&h).unwrap();
        assert_eq!(fp.size, 12);
        assert_eq!(fp.digest, hash_bytes(HashAlgorithm::Xxh3, b"#define A 1\n"));
        assert!(f.matches(&fp));
    }

    #[test]
    fn changed_file_does_not_match() {
        let tmp = TempDir::new().unwrap();
        let h = write(&tmp, "a.h", b"#define A 1\n");
        let recorded = ContentFingerprinter::new(HashAlgorithm::Xxh3)
            .fingerprint(&h)
            .unwrap();

        // Same size, different content
        write(&tmp, "a.h", b"#define A 2\n");
        assert!(!ContentFingerprinter::new(HashAlgorithm::Xxh3).matches(&recorded));

        // Different size
        write(&tmp, "a.h", b"#define A 22\n");
        assert!(!ContentFingerprinter::new(HashAlgorithm::Xxh3).matches(&recorded));
    }

    #[test]
    fn missing_file_has_no_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("gone.h");
        let mut f = ContentFingerprinter::new(HashAlgorithm::Sha256);
        assert!(f.fingerprint(missing.to_str().unwrap()).is_none());
    }

    #[test]
    fn results_are_memoised() {
        let tmp = TempDir::new().unwrap();
        let h = write(&tmp, "a.h", b"one");
        let mut f = ContentFingerprinter::new(HashAlgorithm::Xxh3);
        let first = f.fingerprint(&h).unwrap();

        std::fs::remove_file(&h).unwrap();
        assert_eq!(f.fingerprint(&h), Some(first));
    }

    #[test]
    fn too_new_files_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let h = write(&tmp, "a.h", b"x");
        let before = SystemTime::now() - Duration::from_secs(3600);
        let after = SystemTime::now() + Duration::from_secs(3600);

        let mut f = ContentFingerprinter::new(HashAlgorithm::Xxh3).reject_newer_than(before);
        assert!(f.fingerprint(&h).is_none());

        let mut f = ContentFingerprinter::new(HashAlgorithm::Xxh3).reject_newer_than(after);
        assert!(f.fingerprint(&h).is_some());
    }

    #[test]
    fn record_all_is_all_or_nothing() {
        let tmp = TempDir::new().unwrap();
        let a = write(&tmp, "a.h", b"a");
        let b = write(&tmp, "b.h", b"b");
        let missing = tmp.path().join("c.h").to_string_lossy().into_owned();

        let mut f = ContentFingerprinter::new(HashAlgorithm::Xxh3);
        assert_eq!(f.record_all([a.as_str(), b.as_str()]).unwrap().len(), 2);
        assert!(f.record_all([a.as_str(), missing.as_str()]).is_none());
    }
}
