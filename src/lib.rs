//! objstash - compiler output cache
//!
//! Stores compiler outputs keyed by a digest of everything that affects
//! them, so an identical compilation can be answered from the cache. The
//! [`engine`] drives lookups and stores across the local directory tier
//! and optional remote tiers; the rest of the crate provides the pieces
//! it is built from and the `objstash` maintenance CLI.

pub mod atomic;
pub mod cli;
pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod lock;
pub mod manifest;
pub mod storage;
pub mod ui;

pub use engine::{CacheInputs, Engine, EngineOptions, LookupOutcome, MissToken, StoreOutcome};
pub use error::{StashError, StashResult};
