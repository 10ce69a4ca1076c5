//! Configuration schema for objstash
//!
//! Configuration is stored at `~/.config/objstash/config.toml`

use crate::error::{StashError, StashResult};
use crate::hash::HashAlgorithm;
use crate::storage::secondary::parse_specs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Local cache directory and limits
    pub cache: CacheConfig,

    /// Result compression
    pub compression: CompressionConfig,

    /// Manifest settings
    pub manifest: ManifestConfig,

    /// Entry lock timing
    pub lock: LockConfig,

    /// Maintenance settings
    pub cleanup: CleanupConfig,

    /// Remote tiers
    pub secondary: SecondaryConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Local cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root; defaults to the platform cache directory
    pub dir: Option<PathBuf>,

    /// Directory levels below the root (1-8)
    pub levels: usize,

    /// Size ceiling, e.g. "5G" or "500Mi"; "0" disables
    pub max_size: String,

    /// File count ceiling; 0 disables
    pub max_files: u64,

    /// Fraction of the ceilings a cleanup trims down to
    pub limit_multiple: f64,

    /// Serve hits but never write
    pub read_only: bool,

    /// Digest algorithm for new entries
    pub hash_algorithm: HashAlgorithm,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            levels: 2,
            max_size: "5G".to_string(),
            max_files: 0,
            limit_multiple: 0.8,
            read_only: false,
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

impl CacheConfig {
    /// Configured root, or `<platform cache dir>/objstash`
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("objstash")
        })
    }

    pub fn max_size_bytes(&self) -> StashResult<u64> {
        parse_size(&self.max_size)
    }
}

/// Result compression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,

    /// zstd level; negative levels trade ratio for speed
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: crate::compression::DEFAULT_LEVEL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Entries kept per manifest before the oldest is dropped
    pub max_entries: usize,

    /// Look up by header fingerprints before running the preprocessor
    pub direct_mode: bool,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            max_entries: crate::manifest::DEFAULT_MAX_ENTRIES,
            direct_mode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Age after which an unheld lock file is swept
    pub stale_after_ms: u64,

    /// Longest wait for a lock before giving up
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: crate::lock::DEFAULT_STALE_AFTER.as_millis() as u64,
            timeout_ms: crate::lock::DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Unfinished temporaries older than this are removed by sweeps
    pub temp_max_age_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            temp_max_age_secs: 3600,
        }
    }
}

/// Remote tier settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryConfig {
    /// `URL|attr=value|...` specs, consulted in order
    pub storage: Vec<String>,

    /// Push local hits to the remotes
    pub reshare: bool,
}

impl Config {
    /// Reject values the cache cannot run with
    pub fn validate(&self) -> StashResult<()> {
        if !(1..=8).contains(&self.cache.levels) {
            return Err(StashError::invalid_config(format!(
                "cache.levels must be between 1 and 8, got {}",
                self.cache.levels
            )));
        }
        self.cache.max_size_bytes()?;
        let m = self.cache.limit_multiple;
        if !(m > 0.0 && m <= 1.0) {
            return Err(StashError::invalid_config(format!(
                "cache.limit_multiple must be in (0, 1], got {m}"
            )));
        }
        if self.compression.enabled {
            crate::compression::Compressor::zstd(self.compression.level)?;
        }
        if self.manifest.max_entries == 0 {
            return Err(StashError::invalid_config(
                "manifest.max_entries must be at least 1",
            ));
        }
        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(StashError::invalid_config(format!(
                "general.log_format must be \"text\" or \"json\", got {:?}",
                self.general.log_format
            )));
        }
        for spec in &self.secondary.storage {
            parse_specs(spec)?;
        }
        Ok(())
    }
}

/// Parse a size such as `5G`, `500M`, `2Gi` or `1024k`.
///
/// `k`, `M`, `G`, `T` are powers of 1000 (`K` is accepted for `k`);
/// `Ki`, `Mi`, `Gi`, `Ti` are powers of 1024. A bare number is in G.
pub fn parse_size(value: &str) -> StashResult<u64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| StashError::invalid_config(format!("invalid size {value:?}")))?;

    let multiplier: u64 = match suffix.trim() {
        "" | "G" => 1000u64.pow(3),
        "k" | "K" => 1000,
        "M" => 1000u64.pow(2),
        "T" => 1000u64.pow(4),
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        other => {
            return Err(StashError::invalid_config(format!(
                "invalid size suffix {other:?} in {value:?}"
            )))
        }
    };
    Ok((number * multiplier as f64) as u64)
}

/// Parse a duration of whole days (`30d`) or seconds (`3600s`)
pub fn parse_duration(value: &str) -> StashResult<std::time::Duration> {
    let value = value.trim();
    let invalid = || {
        StashError::invalid_config(format!(
            "invalid duration {value:?}; use e.g. \"30d\" or \"3600s\""
        ))
    };
    let (number, unit) = value.split_at(value.len().saturating_sub(1));
    let n: u64 = number.parse().map_err(|_| invalid())?;
    let secs = match unit {
        "d" => n.checked_mul(24 * 3600).ok_or_else(invalid)?,
        "s" => n,
        _ => return Err(invalid()),
    };
    Ok(std::time::Duration::from_secs(secs))
}

/// Render a byte count for humans, e.g. `1.5 GB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = u;
    }
    format!("{value:.1} {unit}")
}
