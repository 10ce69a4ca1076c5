//! CLI command implementations

pub mod compression;
pub mod config;
pub mod inspect;
pub mod maintenance;
pub mod stats;

pub use compression::{recompress, show_compression};
pub use config::execute as config;
pub use inspect::{dump_manifest, extract_result, hash_file};
pub use maintenance::{cleanup, clear, evict_older_than};
pub use stats::{stats, zero_stats};

use crate::config::Config;
use crate::engine::EngineOptions;
use crate::error::StashResult;
use crate::storage::LocalStorage;

/// Local cache as configured
fn open_storage(config: &Config) -> StashResult<LocalStorage> {
    LocalStorage::new(EngineOptions::from_config(config)?.local)
}
