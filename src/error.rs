//! Error types for objstash
//!
//! All modules use `StashResult<T>` as their return type. Errors fall into
//! two groups: soft failures that the engine downgrades to a cache miss,
//! and hard failures that are surfaced to the caller.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for objstash operations
pub type StashResult<T> = Result<T, StashError>;

/// All errors that can occur in objstash
#[derive(Error, Debug)]
pub enum StashError {
    // Cache content errors
    #[error("Corrupt cache data: {0}")]
    CorruptData(String),

    // Remote tier errors
    #[error("Secondary storage {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl StashError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a corrupt data error
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptData(reason.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Create a backend unavailable error
    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Whether a lookup hitting this error should simply count as a miss.
    ///
    /// Local IO failures are included here too: on the read path nothing
    /// the cache does may fail the compile.
    pub fn is_soft_miss(&self) -> bool {
        matches!(
            self,
            Self::CorruptData(_)
                | Self::BackendUnavailable { .. }
                | Self::Timeout { .. }
                | Self::Io { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidConfig(_) | Self::ConfigInvalid { .. } => {
                Some("Check the file shown by: objstash config path")
            }
            Self::Timeout { .. } => Some("A stale lock may remain; run: objstash cleanup"),
            Self::CorruptData(_) => Some("Run: objstash clear to drop damaged entries"),
            _ => None,
        }
    }
}
