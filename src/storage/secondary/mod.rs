//! Remote cache tiers
//!
//! Every backend offers the same three operations. Each returns
//! `Ok(Some/true)` for found, `Ok(None/false)` for not found, and `Err`
//! for a backend failure that callers treat as a miss.

mod factory;
mod file;
mod http;
mod redis;
mod spec;

pub use factory::create_backend;
pub use file::FileStorage;
pub use http::HttpStorage;
pub use redis::{ConnectionState, RedisStorage};
pub use spec::{parse_specs, Attributes, NetworkAttributes, StorageSpec, DEFAULT_NAMESPACE};

use super::CacheKey;
use crate::error::{StashError, StashResult};
use tracing::{debug, warn};

/// Capability set shared by all remote backends
pub trait SecondaryStorage: Send {
    /// Fetch a stored value
    fn get(&mut self, key: &CacheKey) -> StashResult<Option<Vec<u8>>>;

    /// Store a value. With `only_if_absent`, an existing value is kept and
    /// `false` is returned.
    fn put(&mut self, key: &CacheKey, value: &[u8], only_if_absent: bool) -> StashResult<bool>;

    /// Delete a value; `false` if it was not there
    fn remove(&mut self, key: &CacheKey) -> StashResult<bool>;
}

/// A configured remote: backend plus the generic attributes
pub struct SecondaryTier {
    name: String,
    backend: Box<dyn SecondaryStorage>,
    read_only: bool,
    warned: bool,
}

impl SecondaryTier {
    /// Build from a parsed spec; bad attributes fail here, not per call
    pub fn from_spec(spec: &StorageSpec) -> StashResult<Self> {
        let mut attrs = spec.attributes();
        let read_only = attrs.take_bool("read-only")?;
        let namespace = attrs
            .take("namespace")
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if namespace.is_empty() || namespace.contains(['/', ':', '\\']) {
            return Err(StashError::invalid_config(format!(
                "namespace {namespace:?} must be non-empty and free of '/', ':' and '\\'"
            )));
        }
        let backend = create_backend(spec, &namespace, attrs)?;
        Ok(Self::new(spec.redacted_url(), backend, read_only))
    }

    pub fn new(name: impl Into<String>, backend: Box<dyn SecondaryStorage>, read_only: bool) -> Self {
        Self {
            name: name.into(),
            backend,
            read_only,
            warned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn get(&mut self, key: &CacheKey) -> StashResult<Option<Vec<u8>>> {
        let result = self.backend.get(key);
        self.note(result)
    }

    pub fn put(&mut self, key: &CacheKey, value: &[u8], only_if_absent: bool) -> StashResult<bool> {
        if self.read_only {
            return Ok(false);
        }
        let result = self.backend.put(key, value, only_if_absent);
        self.note(result)
    }

    pub fn remove(&mut self, key: &CacheKey) -> StashResult<bool> {
        if self.read_only {
            return Ok(false);
        }
        let result = self.backend.remove(key);
        self.note(result)
    }

    /// Log the first unavailability loudly, the rest quietly
    fn note<T>(&mut self, result: StashResult<T>) -> StashResult<T> {
        if let Err(e) = &result {
            if matches!(e, StashError::BackendUnavailable { .. }) && !self.warned {
                warn!("Remote storage {} unavailable: {}", self.name, e);
                self.warned = true;
            } else {
                debug!("Remote storage {}: {}", self.name, e);
            }
        }
        result
    }
}

/// Build every configured remote, failing on the first bad spec
pub fn build_tiers(specs: &[StorageSpec]) -> StashResult<Vec<SecondaryTier>> {
    specs.iter().map(SecondaryTier::from_spec).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory backend for tier and engine tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct MemoryStorage {
        pub data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        pub down: Arc<Mutex<bool>>,
    }

    impl MemoryStorage {
        fn check(&self) -> StashResult<()> {
            if *self.down.lock().unwrap() {
                return Err(StashError::unavailable("memory", "forced down"));
            }
            Ok(())
        }
    }

    impl SecondaryStorage for MemoryStorage {
        fn get(&mut self, key: &CacheKey) -> StashResult<Option<Vec<u8>>> {
            self.check()?;
            Ok(self.data.lock().unwrap().get(&key.to_string()).cloned())
        }

        fn put(&mut self, key: &CacheKey, value: &[u8], only_if_absent: bool) -> StashResult<bool> {
            self.check()?;
            let mut data = self.data.lock().unwrap();
            if only_if_absent && data.contains_key(&key.to_string()) {
                return Ok(false);
            }
            data.insert(key.to_string(), value.to_vec());
            Ok(true)
        }

        fn remove(&mut self, key: &CacheKey) -> StashResult<bool> {
            self.check()?;
            Ok(self.data.lock().unwrap().remove(&key.to_string()).is_some())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryStorage;
    use super::*;
    use crate::hash::{hash_bytes, HashAlgorithm};

    fn key() -> CacheKey {
        CacheKey::result(hash_bytes(HashAlgorithm::Xxh3, b"obj"))
    }

    #[test]
    fn read_only_tier_never_writes() {
        let mem = MemoryStorage::default();
        let mut tier = SecondaryTier::new("mem", Box::new(mem.clone()), true);
        assert!(!tier.put(&key(), b"x", false).unwrap());
        assert!(!tier.remove(&key()).unwrap());
        assert!(mem.data.lock().unwrap().is_empty());
    }

    #[test]
    fn unavailable_backend_is_soft() {
        let mem = MemoryStorage::default();
        *mem.down.lock().unwrap() = true;
        let mut tier = SecondaryTier::new("mem", Box::new(mem), false);

        let err = tier.get(&key()).unwrap_err();
        assert!(err.is_soft_miss());
        assert!(tier.get(&key()).is_err());
        assert!(tier.warned);
    }

    #[test]
    fn only_if_absent() {
        let mut tier = SecondaryTier::new("mem", Box::new(MemoryStorage::default()), false);
        assert!(tier.put(&key(), b"a", true).unwrap());
        assert!(!tier.put(&key(), b"b", true).unwrap());
        assert_eq!(tier.get(&key()).unwrap().unwrap(), b"a");
        assert!(tier.remove(&key()).unwrap());
        assert_eq!(tier.get(&key()).unwrap(), None);
    }

    #[test]
    fn generic_attributes() {
        let spec: StorageSpec = "file:///tmp/x|read-only|namespace=team".parse().unwrap();
        let tier = SecondaryTier::from_spec(&spec).unwrap();
        assert!(tier.is_read_only());

        let spec: StorageSpec = "file:///tmp/x|namespace=a:b".parse().unwrap();
        assert!(SecondaryTier::from_spec(&spec).is_err());

        let spec: StorageSpec = "file:///tmp/x|color=blue".parse().unwrap();
        assert!(matches!(
            SecondaryTier::from_spec(&spec),
            Err(StashError::InvalidConfig(_))
        ));
    }
}
