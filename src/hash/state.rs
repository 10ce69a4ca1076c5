//! Incremental hashing

use super::digest::{Digest, HashAlgorithm};
use crate::error::{StashError, StashResult};
use sha2::{Digest as _, Sha256};
use std::io::Read;
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

/// Marker absorbed before every delimiter label
const DELIMITER: &[u8] = b"\x00objstash\x00";

const READ_CHUNK: usize = 64 * 1024;

enum Inner {
    Xxh3(Box<Xxh3>),
    Sha256(Sha256),
}

/// Incremental hasher.
///
/// The digest depends only on the concatenation of absorbed bytes, not on
/// how they were chunked. [`HashState::finalize`] does not disturb the
/// state, so it may be called repeatedly and absorbing may continue after.
pub struct HashState {
    algorithm: HashAlgorithm,
    inner: Inner,
}

impl HashState {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::Xxh3 => Inner::Xxh3(Box::new(Xxh3::new())),
            HashAlgorithm::Sha256 => Inner::Sha256(Sha256::new()),
        };
        Self { algorithm, inner }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Feed bytes into the hash
    pub fn absorb(&mut self, bytes: &[u8]) {
        match &mut self.inner {
            Inner::Xxh3(h) => h.update(bytes),
            Inner::Sha256(h) => h.update(bytes),
        }
    }

    /// Separate logical fields so that ("ab", "c") and ("a", "bc") hash differently
    pub fn delimiter(&mut self, label: &str) {
        self.absorb(DELIMITER);
        self.absorb(label.as_bytes());
        self.absorb(&[0]);
    }

    /// Absorb an integer in a fixed-width encoding
    pub fn absorb_int(&mut self, value: i64) {
        self.absorb(&value.to_le_bytes());
    }

    /// Absorb a length-prefixed string
    pub fn absorb_str(&mut self, s: &str) {
        self.absorb(&(s.len() as u64).to_le_bytes());
        self.absorb(s.as_bytes());
    }

    /// Absorb everything a reader yields
    pub fn absorb_reader<R: Read>(&mut self, mut reader: R) -> std::io::Result<u64> {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.absorb(&buf[..n]);
            total += n as u64;
        }
    }

    /// Digest of everything absorbed so far
    pub fn finalize(&self) -> Digest {
        match &self.inner {
            Inner::Xxh3(h) => Digest::from_hasher(self.algorithm, &h.digest128().to_le_bytes()),
            Inner::Sha256(h) => Digest::from_hasher(self.algorithm, &h.clone().finalize()),
        }
    }

    /// Return to the freshly constructed state
    pub fn reset(&mut self) {
        match &mut self.inner {
            Inner::Xxh3(h) => h.reset(),
            Inner::Sha256(h) => sha2::Digest::reset(h),
        }
    }
}

/// One-shot digest of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> Digest {
    let mut state = HashState::new(algorithm);
    state.absorb(bytes);
    state.finalize()
}

/// Digest of a file's content, streamed
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> StashResult<Digest> {
    let file = std::fs::File::open(path)
        .map_err(|e| StashError::io(format!("opening {}", path.display()), e))?;
    let mut state = HashState::new(algorithm);
    state
        .absorb_reader(std::io::BufReader::new(file))
        .map_err(|e| StashError::io(format!("reading {}", path.display()), e))?;
    Ok(state.finalize())
}
