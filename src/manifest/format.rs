//! Binary manifest encoding
//!
//! ```text
//! header:  magic[4] version:u8 algorithm:u8 entry_count:u32
//! entry:   body_len:u32 body
//! body:    fp_count:u32 { path_len:u32 path size:u64 digest } result_digest
//! ```
//!
//! Integers are little-endian; digests are raw bytes whose length follows
//! from the algorithm byte. Entries are length-prefixed so a body that
//! fails to parse is skipped without losing its neighbours. A truncated
//! stream or a foreign header invalidates the whole manifest.

use super::{FileFingerprint, Manifest, ManifestEntry};
use crate::error::{StashError, StashResult};
use crate::hash::{Digest, HashAlgorithm};
use tracing::debug;

pub const MAGIC: [u8; 4] = *b"oSmF";
pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = 10;

/// Cursor over untrusted input; every read is bounds-checked
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.take(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Some(u64::from_le_bytes(a))
    }

    fn digest(&mut self, algorithm: HashAlgorithm) -> Option<Digest> {
        let raw = self.take(algorithm.digest_len())?;
        Digest::from_parts(algorithm, raw).ok()
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_len(out: &mut Vec<u8>, n: usize) {
    // Entries and paths are far below 4 GiB; saturate rather than wrap.
    put_u32(out, u32::try_from(n).unwrap_or(u32::MAX));
}

fn encode_body(entry: &ManifestEntry, out: &mut Vec<u8>) {
    put_len(out, entry.fingerprints.len());
    for fp in &entry.fingerprints {
        put_len(out, fp.path.len());
        out.extend_from_slice(fp.path.as_bytes());
        out.extend_from_slice(&fp.size.to_le_bytes());
        out.extend_from_slice(fp.digest.as_bytes());
    }
    out.extend_from_slice(entry.result.as_bytes());
}

fn decode_body(body: &[u8], algorithm: HashAlgorithm) -> Option<ManifestEntry> {
    let mut r = Reader::new(body);
    let count = r.u32()? as usize;
    // Each fingerprint needs at least a length, a size and a digest.
    let min_fp = 4 + 8 + algorithm.digest_len();
    if count > r.remaining() / min_fp {
        return None;
    }

    let mut fingerprints = Vec::with_capacity(count);
    for _ in 0..count {
        let path_len = r.u32()? as usize;
        let path = std::str::from_utf8(r.take(path_len)?).ok()?;
        let size = r.u64()?;
        let digest = r.digest(algorithm)?;
        fingerprints.push(FileFingerprint::new(path, size, digest));
    }
    let result = r.digest(algorithm)?;
    if r.remaining() != 0 {
        return None;
    }
    Some(ManifestEntry::new(fingerprints, result))
}

impl Manifest {
    /// Serialize; [`Manifest::from_bytes`] is the exact inverse
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 * (self.entries.len() + 1));
        out.extend_from_slice(&MAGIC);
        out.push(FORMAT_VERSION);
        out.push(self.algorithm.to_byte());
        put_len(&mut out, self.entries.len());

        let mut body = Vec::new();
        for entry in &self.entries {
            body.clear();
            encode_body(entry, &mut body);
            put_len(&mut out, body.len());
            out.extend_from_slice(&body);
        }
        out
    }

    /// Parse a stored manifest.
    ///
    /// Any header problem, including a version from another release, is
    /// `CorruptData`, which callers treat as "no manifest".
    pub fn from_bytes(bytes: &[u8]) -> StashResult<Self> {
        let mut r = Reader::new(bytes);
        let header = r
            .take(HEADER_LEN)
            .ok_or_else(|| StashError::corrupt("manifest header truncated"))?;
        if header[..4] != MAGIC {
            return Err(StashError::corrupt("manifest magic mismatch"));
        }
        if header[4] != FORMAT_VERSION {
            return Err(StashError::corrupt(format!(
                "manifest version {} (expected {})",
                header[4], FORMAT_VERSION
            )));
        }
        let algorithm = HashAlgorithm::from_byte(header[5]).ok_or_else(|| {
            StashError::corrupt(format!("unknown manifest hash algorithm {}", header[5]))
        })?;
        let count = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

        let mut entries = Vec::with_capacity(count.min(r.remaining() / 4));
        for index in 0..count {
            let len = r
                .u32()
                .ok_or_else(|| StashError::corrupt(format!("manifest truncated at entry {index}")))?
                as usize;
            let body = r
                .take(len)
                .ok_or_else(|| StashError::corrupt(format!("manifest truncated in entry {index}")))?;
            match decode_body(body, algorithm) {
                Some(entry) => entries.push(entry),
                None => debug!(entry = index, "Skipping unreadable manifest entry"),
            }
        }
        if r.remaining() != 0 {
            return Err(StashError::corrupt(format!(
                "{} trailing bytes after manifest",
                r.remaining()
            )));
        }

        Ok(Self { algorithm, entries })
    }
}
