//! Content fingerprinting
//!
//! Everything in the cache is keyed by a [`Digest`]: manifests by the digest
//! of the compilation class, result blobs by the digest of their content.
//! Digests are produced by an incremental [`HashState`] whose algorithm is
//! chosen at construction and recorded in the digest's string form, so a
//! cache populated with one algorithm never aliases entries of another.

mod digest;
mod state;

pub use digest::{Digest, HashAlgorithm, MAX_DIGEST_LEN};
pub use state::{hash_bytes, hash_file, HashState};
