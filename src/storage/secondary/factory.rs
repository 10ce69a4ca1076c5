//! Backend selection by URL scheme

use super::file::FileStorage;
use super::http::HttpStorage;
use super::redis::RedisStorage;
use super::spec::{Attributes, StorageSpec};
use super::SecondaryStorage;
use crate::error::{StashError, StashResult};

/// Create the backend for a remote spec.
///
/// `attrs` holds what is left after the generic attributes were taken;
/// each backend rejects anything it does not understand.
pub fn create_backend(
    spec: &StorageSpec,
    namespace: &str,
    attrs: Attributes,
) -> StashResult<Box<dyn SecondaryStorage>> {
    match spec.url.scheme() {
        "file" => Ok(Box::new(FileStorage::new(&spec.url, namespace, attrs)?)),
        "http" | "https" => Ok(Box::new(HttpStorage::new(&spec.url, namespace, attrs)?)),
        "redis" => Ok(Box::new(RedisStorage::new(&spec.url, namespace, attrs)?)),
        other => Err(StashError::invalid_config(format!(
            "unsupported remote storage scheme {other:?} in {}",
            spec.redacted_url()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(s: &str) -> StashResult<Box<dyn SecondaryStorage>> {
        let spec: StorageSpec = s.parse().unwrap();
        create_backend(&spec, "objstash", spec.attributes())
    }

    #[test]
    fn schemes() {
        assert!(build("file:///tmp/objstash-remote").is_ok());
        assert!(build("http://localhost:8080/cache|operation-timeout=100").is_ok());
        assert!(build("redis://localhost:6379|connect-timeout=100").is_ok());
        assert!(matches!(
            build("ftp://example.com/x"),
            Err(StashError::InvalidConfig(_))
        ));
    }

    #[test]
    fn file_backend_takes_no_network_attributes() {
        assert!(matches!(
            build("file:///tmp/x|connect-timeout=5"),
            Err(StashError::InvalidConfig(_))
        ));
    }
}
