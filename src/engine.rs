//! Lookup and store protocol tying the tiers together
//!
//! A lookup hashes the compilation class, loads that class's manifest
//! (local first, then each remote in order), asks the manifest which
//! result matches the live headers, and fetches that result the same way.
//! Anything that goes wrong along the read path is a miss. The caller
//! then compiles and hands the output back to [`Engine::store`].

use crate::compression::{decompress, Compressor};
use crate::config::Config;
use crate::error::{StashError, StashResult};
use crate::hash::{Digest, HashAlgorithm, HashState};
use crate::lock::LockOptions;
use crate::manifest::{ContentFingerprinter, FileFingerprint, Fingerprinter, Manifest, ManifestEntry};
use crate::storage::secondary::{build_tiers, parse_specs, SecondaryTier, StorageSpec};
use crate::storage::{CacheKey, Counter, LocalOptions, LocalStorage, PutOutcome};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bumped when the way inputs are hashed changes
const INPUT_FORMAT: i64 = 1;

/// Typed engine settings
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub local: LocalOptions,
    pub algorithm: HashAlgorithm,
    pub compressor: Compressor,
    pub max_manifest_entries: usize,
    /// Record header fingerprints in manifests. Without it, callers are
    /// expected to fold the preprocessed source into [`CacheInputs`] and
    /// entries carry no fingerprints.
    pub direct_mode: bool,
    pub read_only: bool,
    pub reshare: bool,
    pub secondary: Vec<StorageSpec>,
}

impl EngineOptions {
    /// Defaults for a cache rooted at `root`, no remotes
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            local: LocalOptions::new(root),
            algorithm: HashAlgorithm::default(),
            compressor: Compressor::default(),
            max_manifest_entries: crate::manifest::DEFAULT_MAX_ENTRIES,
            direct_mode: true,
            read_only: false,
            reshare: false,
            secondary: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> StashResult<Self> {
        let mut local = LocalOptions::new(config.cache.resolved_dir());
        local.levels = config.cache.levels;
        local.max_size = config.cache.max_size_bytes()?;
        local.max_files = config.cache.max_files;
        local.limit_multiple = config.cache.limit_multiple;
        local.lock = LockOptions {
            stale_after: Duration::from_millis(config.lock.stale_after_ms),
            timeout: Duration::from_millis(config.lock.timeout_ms),
        };
        local.temp_max_age = Duration::from_secs(config.cleanup.temp_max_age_secs);

        let mut secondary = Vec::new();
        for s in &config.secondary.storage {
            secondary.extend(parse_specs(s)?);
        }

        Ok(Self {
            local,
            algorithm: config.cache.hash_algorithm,
            compressor: Compressor::from_settings(
                config.compression.enabled,
                config.compression.level,
            )?,
            max_manifest_entries: config.manifest.max_entries,
            direct_mode: config.manifest.direct_mode,
            read_only: config.cache.read_only,
            reshare: config.secondary.reshare,
            secondary,
        })
    }
}

/// Cache-affecting inputs of one compilation, hashed as they are added.
///
/// Header contents are not part of this; they are checked per manifest
/// entry instead.
pub struct CacheInputs {
    state: HashState,
}

impl CacheInputs {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let mut state = HashState::new(algorithm);
        state.delimiter("format");
        state.absorb_int(INPUT_FORMAT);
        Self { state }
    }

    /// Compiler identity, e.g. its path plus a version string or digest
    pub fn compiler(mut self, identity: &str) -> Self {
        self.state.delimiter("compiler");
        self.state.absorb_str(identity);
        self
    }

    /// One normalized argument
    pub fn arg(mut self, arg: &str) -> Self {
        self.state.delimiter("arg");
        self.state.absorb_str(arg);
        self
    }

    pub fn args<'a>(self, args: impl IntoIterator<Item = &'a str>) -> Self {
        args.into_iter().fold(self, Self::arg)
    }

    /// Digest of the translation unit's main source file
    pub fn source(mut self, digest: &Digest) -> Self {
        self.state.delimiter("source");
        self.state.absorb_str(digest.algorithm().tag());
        self.state.absorb(digest.as_bytes());
        self
    }

    /// Any other labelled input
    pub fn extra(mut self, label: &str, bytes: &[u8]) -> Self {
        self.state.delimiter(label);
        self.state.absorb_int(bytes.len() as i64);
        self.state.absorb(bytes);
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.state.algorithm()
    }

    /// Key of the manifest for this compilation class
    pub fn class_digest(&self) -> Digest {
        self.state.finalize()
    }
}

/// Where a hit was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitSource {
    Local,
    Secondary,
}

#[derive(Debug)]
pub struct CacheHit {
    /// Decompressed compiler output
    pub bytes: Vec<u8>,
    pub result: Digest,
    pub source: HitSource,
}

/// Handle for storing the output of a compilation that missed
#[derive(Debug, Clone)]
pub struct MissToken {
    class: Digest,
}

impl MissToken {
    pub fn class_digest(&self) -> &Digest {
        &self.class
    }
}

#[derive(Debug)]
pub enum LookupOutcome {
    Hit(CacheHit),
    Miss(MissToken),
}

impl LookupOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// What [`Engine::store`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Result and manifest entry written under this result digest
    Stored(Digest),
    /// Read-only cache; nothing written
    ReadOnly,
}

/// A loaded manifest and the bytes it came from
struct LoadedManifest {
    manifest: Manifest,
    raw: Vec<u8>,
}

pub struct Engine {
    opts: EngineOptions,
    local: LocalStorage,
    tiers: Vec<SecondaryTier>,
}

impl Engine {
    /// Open the local cache and build the configured remotes
    pub fn new(opts: EngineOptions) -> StashResult<Self> {
        let tiers = build_tiers(&opts.secondary)?;
        Self::with_tiers(opts, tiers)
    }

    /// Use already-built remotes instead of `opts.secondary`
    pub fn with_tiers(opts: EngineOptions, tiers: Vec<SecondaryTier>) -> StashResult<Self> {
        let mut local_opts = opts.local.clone();
        local_opts.read_only |= opts.read_only;
        let local = LocalStorage::new(local_opts)?;
        Ok(Self { opts, local, tiers })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    pub fn local(&self) -> &LocalStorage {
        &self.local
    }

    pub fn inputs(&self) -> CacheInputs {
        CacheInputs::new(self.opts.algorithm)
    }

    /// Look up using content fingerprints of the live filesystem
    pub fn lookup(&mut self, inputs: &CacheInputs) -> LookupOutcome {
        let mut fingerprinter = ContentFingerprinter::new(self.opts.algorithm);
        self.lookup_with(inputs, &mut fingerprinter)
    }

    pub fn lookup_with(
        &mut self,
        inputs: &CacheInputs,
        fingerprinter: &mut dyn Fingerprinter,
    ) -> LookupOutcome {
        let class = inputs.class_digest();
        let manifest_key = CacheKey::manifest(class);

        let Some(loaded) = self.load_manifest(&manifest_key) else {
            debug!("No manifest for {}", class);
            return self.miss(class);
        };
        let Some(entry) = loaded.manifest.lookup(fingerprinter) else {
            debug!("No manifest entry of {} matches", class);
            return self.miss(class);
        };
        let result = entry.result;
        let result_key = CacheKey::result(result);

        if let Some(bytes) = self.local_result(&result_key) {
            info!("Local hit for {}", class);
            self.record(&manifest_key, Counter::LocalHit);
            if self.opts.reshare && !self.opts.read_only {
                self.reshare(&manifest_key, &loaded.raw, &result_key);
            }
            return LookupOutcome::Hit(CacheHit {
                bytes,
                result,
                source: HitSource::Local,
            });
        }

        if let Some(bytes) = self.remote_result(&result_key) {
            info!("Remote hit for {}", class);
            self.record(&manifest_key, Counter::SecondaryHit);
            return LookupOutcome::Hit(CacheHit {
                bytes,
                result,
                source: HitSource::Secondary,
            });
        }

        debug!("Result {} for {} is gone", result, class);
        self.miss(class)
    }

    /// Store the output of a compilation that missed.
    ///
    /// `fingerprints` are the headers the compiler actually read. Failing
    /// to write locally is an error; remote failures are only logged.
    pub fn store(
        &mut self,
        token: MissToken,
        bytes: &[u8],
        fingerprints: Vec<FileFingerprint>,
    ) -> StashResult<StoreOutcome> {
        if self.opts.read_only {
            debug!("Read-only cache; not storing {}", token.class);
            return Ok(StoreOutcome::ReadOnly);
        }
        let fingerprints = if self.opts.direct_mode {
            fingerprints
        } else {
            Vec::new()
        };

        let result = result_digest(&token.class, &fingerprints);
        let result_key = CacheKey::result(result);
        let encoded = self.opts.compressor.compress(bytes)?;
        match self.local.put(&result_key, &encoded)? {
            PutOutcome::AlreadyPresent => debug!("Result {} already cached", result),
            _ => debug!("Stored result {} ({} bytes)", result, encoded.len()),
        }
        self.push(&result_key, &encoded, true);

        let manifest_key = CacheKey::manifest(token.class);
        let raw = {
            let guard = self.local.lock(&manifest_key)?;
            let mut manifest = match self.read_local_manifest(&manifest_key) {
                Some(loaded) => loaded.manifest,
                None => Manifest::new(token.class.algorithm()),
            };
            let outcome = manifest.insert(
                ManifestEntry::new(fingerprints, result),
                self.opts.max_manifest_entries,
            );
            if !outcome.changed() {
                debug!("Manifest {} already has this entry", token.class);
                return Ok(StoreOutcome::Stored(result));
            }
            let raw = manifest.to_bytes();
            self.local.put_locked(&manifest_key, &raw, &guard)?;
            debug!("Manifest {} updated ({:?})", token.class, outcome);
            raw
        };
        self.push(&manifest_key, &raw, false);

        Ok(StoreOutcome::Stored(result))
    }

    fn miss(&self, class: Digest) -> LookupOutcome {
        self.record(&CacheKey::manifest(class), Counter::Miss);
        LookupOutcome::Miss(MissToken { class })
    }

    fn record(&self, key: &CacheKey, counter: Counter) {
        if !self.opts.read_only {
            self.local.record(key, counter);
        }
    }

    fn parse_manifest(&self, key: &CacheKey, raw: Vec<u8>) -> StashResult<LoadedManifest> {
        let manifest = Manifest::from_bytes(&raw)?;
        if manifest.algorithm() != key.digest.algorithm() {
            return Err(StashError::corrupt(format!(
                "manifest {} uses {}",
                key,
                manifest.algorithm()
            )));
        }
        Ok(LoadedManifest { manifest, raw })
    }

    fn read_local_manifest(&self, key: &CacheKey) -> Option<LoadedManifest> {
        let raw = match self.local.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Reading manifest {}: {}", key, e);
                self.record(key, Counter::Error);
                return None;
            }
        };
        match self.parse_manifest(key, raw) {
            Ok(loaded) => Some(loaded),
            Err(e) => {
                debug!("Ignoring manifest {}: {}", key, e);
                None
            }
        }
    }

    fn load_manifest(&mut self, key: &CacheKey) -> Option<LoadedManifest> {
        if let Some(loaded) = self.read_local_manifest(key) {
            return Some(loaded);
        }
        for i in 0..self.tiers.len() {
            let raw = match self.tiers[i].get(key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(_) => {
                    self.record(key, Counter::SecondaryError);
                    continue;
                }
            };
            match self.parse_manifest(key, raw) {
                Ok(loaded) => {
                    debug!("Manifest {} found on {}", key, self.tiers[i].name());
                    self.mirror(key, &loaded.raw);
                    return Some(loaded);
                }
                Err(e) => {
                    debug!("Ignoring manifest {} from {}: {}", key, self.tiers[i].name(), e);
                    self.record(key, Counter::SecondaryError);
                }
            }
        }
        None
    }

    fn local_result(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let encoded = match self.local.get(key) {
            Ok(Some(encoded)) => encoded,
            Ok(None) => return None,
            Err(e) => {
                warn!("Reading result {}: {}", key, e);
                self.record(key, Counter::Error);
                return None;
            }
        };
        match decompress(&encoded) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Dropping damaged result {}: {}", key, e);
                self.record(key, Counter::Error);
                if !self.opts.read_only {
                    if let Err(e) = self.local.remove(key) {
                        debug!("Could not remove {}: {}", key, e);
                    }
                }
                None
            }
        }
    }

    fn remote_result(&mut self, key: &CacheKey) -> Option<Vec<u8>> {
        for i in 0..self.tiers.len() {
            let encoded = match self.tiers[i].get(key) {
                Ok(Some(encoded)) => encoded,
                Ok(None) => continue,
                Err(_) => {
                    self.record(key, Counter::SecondaryError);
                    continue;
                }
            };
            match decompress(&encoded) {
                Ok(bytes) => {
                    self.mirror(key, &encoded);
                    return Some(bytes);
                }
                Err(e) => {
                    debug!("Damaged result {} on {}: {}", key, self.tiers[i].name(), e);
                    self.record(key, Counter::SecondaryError);
                }
            }
        }
        None
    }

    /// Copy a remote object into the local tier
    fn mirror(&self, key: &CacheKey, raw: &[u8]) {
        if self.opts.read_only {
            return;
        }
        if let Err(e) = self.local.put(key, raw) {
            debug!("Could not mirror {} locally: {}", key, e);
        }
    }

    /// Write to every writable remote; failures are counted, not returned
    fn push(&mut self, key: &CacheKey, raw: &[u8], only_if_absent: bool) {
        for i in 0..self.tiers.len() {
            match self.tiers[i].put(key, raw, only_if_absent) {
                Ok(true) => debug!("Pushed {} to {}", key, self.tiers[i].name()),
                Ok(false) => {}
                Err(_) => self.record(key, Counter::SecondaryError),
            }
        }
    }

    fn reshare(&mut self, manifest_key: &CacheKey, manifest_raw: &[u8], result_key: &CacheKey) {
        let encoded = match self.local.get(result_key) {
            Ok(Some(encoded)) => encoded,
            _ => return,
        };
        self.push(result_key, &encoded, true);
        self.push(manifest_key, manifest_raw, true);
    }
}

/// Result name: the class plus the exact header state it was built from
fn result_digest(class: &Digest, fingerprints: &[FileFingerprint]) -> Digest {
    let mut sorted: Vec<&FileFingerprint> = fingerprints.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut state = HashState::new(class.algorithm());
    state.delimiter("class");
    state.absorb(class.as_bytes());
    for fp in sorted {
        state.delimiter("header");
        state.absorb_str(&fp.path);
        state.absorb_int(fp.size as i64);
        state.absorb(fp.digest.as_bytes());
    }
    state.finalize()
}
