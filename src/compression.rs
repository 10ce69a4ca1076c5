//! Blob codec
//!
//! Every stored blob starts with a small header so it can be decoded
//! without outside metadata:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | format tag (0 = none, 1 = zstd) |
//! | 1 | 8 | uncompressed length, little-endian |
//! | 9 | .. | payload |

use crate::error::{StashError, StashResult};
use std::io::Read;
use std::ops::RangeInclusive;
use std::str::FromStr;

const TAG_NONE: u8 = 0;
const TAG_ZSTD: u8 = 1;

/// Bytes preceding the payload of every encoded blob
pub const HEADER_LEN: usize = 9;

/// Accepted zstd levels. Negative levels trade ratio for speed.
pub const LEVEL_RANGE: RangeInclusive<i32> = -128..=19;

/// Default zstd level
pub const DEFAULT_LEVEL: i32 = 1;

/// Codec used when writing blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    /// Payload stored verbatim
    None,
    /// Payload compressed with zstd at a fixed level
    Zstd { level: i32 },
}

impl Compressor {
    /// Zstd compressor, rejecting levels outside [`LEVEL_RANGE`]
    pub fn zstd(level: i32) -> StashResult<Self> {
        if !LEVEL_RANGE.contains(&level) {
            return Err(StashError::invalid_config(format!(
                "compression level {} outside {}..={}",
                level,
                LEVEL_RANGE.start(),
                LEVEL_RANGE.end()
            )));
        }
        Ok(Self::Zstd { level })
    }

    /// Build from the `[compression]` settings
    pub fn from_settings(enabled: bool, level: i32) -> StashResult<Self> {
        if enabled {
            Self::zstd(level)
        } else {
            Ok(Self::None)
        }
    }

    /// Encode bytes with this codec
    pub fn compress(&self, data: &[u8]) -> StashResult<Vec<u8>> {
        let (tag, payload) = match self {
            Self::None => (TAG_NONE, None),
            Self::Zstd { level } => {
                let packed = zstd::stream::encode_all(data, *level)
                    .map_err(|e| StashError::io("compressing blob", e))?;
                (TAG_ZSTD, Some(packed))
            }
        };
        let payload = payload.as_deref().unwrap_or(data);

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.push(tag);
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.extend_from_slice(payload);
        Ok(out)
    }
}

/// `uncompressed` (or `none`) or a zstd level
impl FromStr for Compressor {
    type Err = StashError;

    fn from_str(s: &str) -> StashResult<Self> {
        match s.trim() {
            "uncompressed" | "none" => Ok(Self::None),
            level => {
                let level = level.parse::<i32>().map_err(|_| {
                    StashError::invalid_config(format!(
                        "compression level must be an integer or \"uncompressed\", got {level:?}"
                    ))
                })?;
                Self::zstd(level)
            }
        }
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::Zstd {
            level: DEFAULT_LEVEL,
        }
    }
}

/// Format tag and uncompressed length of an encoded blob
pub fn peek_header(encoded: &[u8]) -> StashResult<(u8, u64)> {
    if encoded.len() < HEADER_LEN {
        return Err(StashError::corrupt(format!(
            "blob header truncated ({} bytes)",
            encoded.len()
        )));
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&encoded[1..HEADER_LEN]);
    Ok((encoded[0], u64::from_le_bytes(len)))
}

/// Name of the codec behind a format tag
pub fn codec_name(tag: u8) -> Option<&'static str> {
    match tag {
        TAG_NONE => Some("none"),
        TAG_ZSTD => Some("zstd"),
        _ => None,
    }
}

/// Decode a blob produced by any [`Compressor`]
pub fn decompress(encoded: &[u8]) -> StashResult<Vec<u8>> {
    let (tag, expected) = peek_header(encoded)?;
    let payload = &encoded[HEADER_LEN..];

    let data = match tag {
        TAG_NONE => payload.to_vec(),
        TAG_ZSTD => {
            let decoder = zstd::stream::read::Decoder::new(payload)
                .map_err(|e| StashError::corrupt(format!("zstd stream: {e}")))?;
            // One byte past the hint is enough to detect an overlong stream.
            let mut out = Vec::new();
            decoder
                .take(expected.saturating_add(1))
                .read_to_end(&mut out)
                .map_err(|e| StashError::corrupt(format!("zstd stream: {e}")))?;
            out
        }
        other => {
            return Err(StashError::corrupt(format!(
                "unknown compression tag {other}"
            )))
        }
    };

    if data.len() as u64 != expected {
        return Err(StashError::corrupt(format!(
            "decoded {} bytes, header says {}",
            data.len(),
            expected
        )));
    }
    Ok(data)
}
