//! Direct-mode manifests
//!
//! A manifest is stored under the class digest of a compilation (compiler,
//! flags, main source) and lists the results previously produced for that
//! class. Each entry is guarded by the fingerprints of every header the
//! compiler read; an entry is usable only while all of them still match.
//!
//! Entries are kept oldest-first. Lookup scans newest-first, so the most
//! recently built variant wins when several match.

mod fingerprint;
mod format;

pub use fingerprint::{ContentFingerprinter, FileFingerprint, Fingerprinter};
pub use format::{FORMAT_VERSION, MAGIC};

use crate::hash::{Digest, HashAlgorithm};
use serde::Serialize;
use std::fmt::Write as _;

/// Default cap on entries per manifest
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// A candidate result and the header state it was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub fingerprints: Vec<FileFingerprint>,
    pub result: Digest,
}

impl ManifestEntry {
    pub fn new(fingerprints: Vec<FileFingerprint>, result: Digest) -> Self {
        Self {
            fingerprints,
            result,
        }
    }

    /// Whether both entries record the same fingerprint set, ignoring order
    fn same_inputs(&self, other: &ManifestEntry) -> bool {
        if self.fingerprints.len() != other.fingerprints.len() {
            return false;
        }
        sorted(&self.fingerprints) == sorted(&other.fingerprints)
    }
}

fn sorted(fps: &[FileFingerprint]) -> Vec<&FileFingerprint> {
    let mut v: Vec<_> = fps.iter().collect();
    v.sort_by(|a, b| {
        (&a.path, a.size, a.digest.as_bytes()).cmp(&(&b.path, b.size, b.digest.as_bytes()))
    });
    v
}

/// Effect of [`Manifest::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Entry appended
    Added,
    /// Entry appended after dropping the oldest one
    AddedEvictingOldest,
    /// An entry with the same fingerprint set already exists; nothing changed
    Duplicate,
}

impl InsertOutcome {
    /// Whether the manifest needs to be written back
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// All known results for one compilation class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    algorithm: HashAlgorithm,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            entries: Vec::new(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Entries, oldest first
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest entry whose fingerprints all match the live filesystem
    pub fn lookup(&self, fingerprinter: &mut dyn Fingerprinter) -> Option<&ManifestEntry> {
        for (age, entry) in self.entries.iter().rev().enumerate() {
            if let Some(stale) = entry
                .fingerprints
                .iter()
                .find(|fp| !fingerprinter.matches(fp))
            {
                tracing::debug!(
                    entry = age,
                    path = %stale.path,
                    "Manifest entry rejected: header changed"
                );
                continue;
            }
            return Some(entry);
        }
        None
    }

    /// Add an entry, keeping at most `max_entries`.
    ///
    /// Inserting a fingerprint set that is already present is a no-op. When
    /// full, the oldest entry is dropped before the append. A `max_entries`
    /// of zero is treated as one.
    pub fn insert(&mut self, entry: ManifestEntry, max_entries: usize) -> InsertOutcome {
        if self.entries.iter().any(|e| e.same_inputs(&entry)) {
            return InsertOutcome::Duplicate;
        }

        let max_entries = max_entries.max(1);
        let mut evicted = false;
        while self.entries.len() >= max_entries {
            self.entries.remove(0);
            evicted = true;
        }
        self.entries.push(entry);

        if evicted {
            InsertOutcome::AddedEvictingOldest
        } else {
            InsertOutcome::Added
        }
    }

    /// Human-readable listing, newest entry last
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Manifest version: {}", FORMAT_VERSION);
        let _ = writeln!(out, "Hash algorithm: {}", self.algorithm);
        let _ = writeln!(out, "Entries: {}", self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            let _ = writeln!(out, "  Entry {}:", i);
            let _ = writeln!(out, "    Result: {}", entry.result);
            for fp in &entry.fingerprints {
                let _ = writeln!(out, "    {} ({} bytes) {}", fp.path, fp.size, fp.digest);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::collections::HashMap;

    /// Fingerprinter backed by an in-memory file table
    struct FakeFs(HashMap<String, Vec<u8>>);

    impl FakeFs {
        fn new(files: &[(&str, &[u8])]) -> Self {
            Self(
                files
                    .iter()
                    .map(|(p, b)| (p.to_string(), b.to_vec()))
                    .collect(),
            )
        }

        fn fp(&mut self, path: &str) -> FileFingerprint {
            self.fingerprint(path).unwrap()
        }
    }

    impl Fingerprinter for FakeFs {
        fn fingerprint(&mut self, path: &str) -> Option<FileFingerprint> {
            let body = self.0.get(path)?;
            Some(FileFingerprint::new(
                path,
                body.len() as u64,
                hash_bytes(HashAlgorithm::Xxh3, body),
            ))
        }
    }

    fn result(tag: &[u8]) -> Digest {
        hash_bytes(HashAlgorithm::Xxh3, tag)
    }

    #[test]
    fn lookup_prefers_newest_match() {
        let mut fs = FakeFs::new(&[("a.h", b"A"), ("b.h", b"B")]);
        let mut m = Manifest::new(HashAlgorithm::Xxh3);
        m.insert(ManifestEntry::new(vec![fs.fp("a.h")], result(b"r1")), 10);
        m.insert(
            ManifestEntry::new(vec![fs.fp("a.h"), fs.fp("b.h")], result(b"r2")),
            10,
        );

        assert_eq!(m.lookup(&mut fs).unwrap().result, result(b"r2"));
    }

    #[test]
    fn changed_header_skips_entry() {
        let mut fs = FakeFs::new(&[("a.h", b"A"), ("b.h", b"B")]);
        let mut m = Manifest::new(HashAlgorithm::Xxh3);
        m.insert(ManifestEntry::new(vec![fs.fp("a.h")], result(b"r1")), 10);
        m.insert(ManifestEntry::new(vec![fs.fp("b.h")], result(b"r2")), 10);

        fs.0.insert("b.h".into(), b"B changed".to_vec());
        assert_eq!(m.lookup(&mut fs).unwrap().result, result(b"r1"));

        fs.0.insert("a.h".into(), b"A changed".to_vec());
        assert!(m.lookup(&mut fs).is_none());
    }

    #[test]
    fn missing_header_is_a_mismatch() {
        let mut fs = FakeFs::new(&[("a.h", b"A")]);
        let mut m = Manifest::new(HashAlgorithm::Xxh3);
        m.insert(ManifestEntry::new(vec![fs.fp("a.h")], result(b"r1")), 10);
        fs.0.clear();
        assert!(m.lookup(&mut fs).is_none());
    }

    #[test]
    fn duplicate_fingerprint_set_is_noop() {
        let mut fs = FakeFs::new(&[("a.h", b"A"), ("b.h", b"B")]);
        let mut m = Manifest::new(HashAlgorithm::Xxh3);
        let first = m.insert(
            ManifestEntry::new(vec![fs.fp("a.h"), fs.fp("b.h")], result(b"r1")),
            10,
        );
        assert_eq!(first, InsertOutcome::Added);

        // Same set in a different order
        let again = m.insert(
            ManifestEntry::new(vec![fs.fp("b.h"), fs.fp("a.h")], result(b"r9")),
            10,
        );
        assert_eq!(again, InsertOutcome::Duplicate);
        assert!(!again.changed());
        assert_eq!(m.len(), 1);
        assert_eq!(m.entries()[0].result, result(b"r1"));
    }

    #[test]
    fn full_manifest_drops_oldest() {
        let mut fs = FakeFs::new(&[("1.h", b"1"), ("2.h", b"2"), ("3.h", b"3")]);
        let mut m = Manifest::new(HashAlgorithm::Xxh3);
        m.insert(ManifestEntry::new(vec![fs.fp("1.h")], result(b"r1")), 2);
        m.insert(ManifestEntry::new(vec![fs.fp("2.h")], result(b"r2")), 2);
        let outcome = m.insert(ManifestEntry::new(vec![fs.fp("3.h")], result(b"r3")), 2);

        assert_eq!(outcome, InsertOutcome::AddedEvictingOldest);
        assert_eq!(m.len(), 2);
        assert_eq!(m.entries()[0].result, result(b"r2"));
        assert_eq!(m.lookup(&mut fs).unwrap().result, result(b"r3"));
    }

    #[test]
    fn empty_fingerprint_set_always_matches() {
        let mut fs = FakeFs::new(&[]);
        let mut m = Manifest::new(HashAlgorithm::Xxh3);
        m.insert(ManifestEntry::new(vec![], result(b"r")), 10);
        assert_eq!(m.lookup(&mut fs).unwrap().result, result(b"r"));
    }

    #[test]
    fn dump_lists_entries() {
        let mut fs = FakeFs::new(&[("stdio.h", b"int printf();")]);
        let mut m = Manifest::new(HashAlgorithm::Xxh3);
        m.insert(ManifestEntry::new(vec![fs.fp("stdio.h")], result(b"r")), 10);
        let text = m.dump();
        assert!(text.contains("Entries: 1"));
        assert!(text.contains("stdio.h (13 bytes)"));
        assert!(text.contains(&result(b"r").to_string()));
    }
}
