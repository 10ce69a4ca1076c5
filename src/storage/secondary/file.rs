//! Shared-directory remote (NFS mounts and the like)

use super::spec::Attributes;
use super::SecondaryStorage;
use crate::atomic::{write_atomic, AtomicWriter};
use crate::error::{StashError, StashResult};
use crate::storage::CacheKey;
use std::io::Write;
use std::path::PathBuf;
use url::Url;

/// Stores `<root>/<namespace>/<2 hex>/<key>`
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(url: &Url, namespace: &str, attrs: Attributes) -> StashResult<Self> {
        attrs.finish("file")?;
        let root = url
            .to_file_path()
            .map_err(|_| StashError::invalid_config(format!("{url} is not a local path")))?;
        Ok(Self {
            dir: root.join(namespace),
        })
    }

    fn path(&self, key: &CacheKey) -> PathBuf {
        let hex = key.digest.to_hex();
        self.dir.join(&hex[..2]).join(key.to_string())
    }
}

impl SecondaryStorage for FileStorage {
    fn get(&mut self, key: &CacheKey) -> StashResult<Option<Vec<u8>>> {
        let path = self.path(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StashError::io(format!("reading {}", path.display()), e)),
        }
    }

    fn put(&mut self, key: &CacheKey, value: &[u8], only_if_absent: bool) -> StashResult<bool> {
        let path = self.path(key);
        if !only_if_absent {
            write_atomic(&path, value)?;
            return Ok(true);
        }
        let mut writer = AtomicWriter::create(&path)?;
        writer
            .write_all(value)
            .map_err(|e| StashError::io(format!("writing {}", path.display()), e))?;
        writer.commit_new()
    }

    fn remove(&mut self, key: &CacheKey) -> StashResult<bool> {
        let path = self.path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StashError::io(format!("removing {}", path.display()), e)),
        }
    }
}
