//! Remote storage configuration strings
//!
//! One remote is written as `URL|key=value|key=value`; several are
//! separated by whitespace:
//!
//! ```text
//! redis://cache.internal:6379|connect-timeout=200|read-only
//! file:///mnt/shared/objstash|namespace=ci
//! ```
//!
//! A bare `key` means `key=true`.

use crate::error::{StashError, StashResult};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default key prefix on remotes
pub const DEFAULT_NAMESPACE: &str = "objstash";

/// A parsed remote storage entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSpec {
    pub url: Url,
    pub attributes: BTreeMap<String, String>,
}

impl StorageSpec {
    /// URL safe for logs: any embedded password is masked
    pub fn redacted_url(&self) -> String {
        let mut url = self.url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("*****"));
        }
        url.to_string()
    }

    /// Consume the attributes a backend may look at
    pub fn attributes(&self) -> Attributes {
        Attributes {
            remaining: self.attributes.clone(),
        }
    }
}

impl fmt::Display for StorageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted_url())?;
        for (k, v) in &self.attributes {
            if k == "password" {
                write!(f, "|{}=*****", k)?;
            } else {
                write!(f, "|{}={}", k, v)?;
            }
        }
        Ok(())
    }
}

impl FromStr for StorageSpec {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('|');
        let raw_url = parts.next().unwrap_or_default().trim();
        if raw_url.is_empty() {
            return Err(StashError::invalid_config("empty remote storage URL"));
        }
        let url = Url::parse(raw_url)
            .map_err(|e| StashError::invalid_config(format!("bad remote URL {raw_url:?}: {e}")))?;

        let mut attributes = BTreeMap::new();
        for attr in parts {
            let attr = attr.trim();
            if attr.is_empty() {
                continue;
            }
            let (key, value) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attr, "true"),
            };
            if key.is_empty() {
                return Err(StashError::invalid_config(format!(
                    "remote attribute {attr:?} has no name"
                )));
            }
            attributes.insert(key.to_string(), value.to_string());
        }

        Ok(Self { url, attributes })
    }
}

/// Parse a whitespace-separated list of remote specs
pub fn parse_specs(s: &str) -> StashResult<Vec<StorageSpec>> {
    s.split_whitespace().map(str::parse).collect()
}

/// Attribute map that tracks which keys were used.
///
/// Backends take what they understand and call [`Attributes::finish`],
/// which rejects whatever is left.
#[derive(Debug)]
pub struct Attributes {
    remaining: BTreeMap<String, String>,
}

impl Attributes {
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.remaining.remove(key)
    }

    pub fn take_bool(&mut self, key: &str) -> StashResult<bool> {
        match self.take(key).as_deref() {
            None | Some("false") => Ok(false),
            Some("true") => Ok(true),
            Some(other) => Err(StashError::invalid_config(format!(
                "{key} must be true or false, got {other:?}"
            ))),
        }
    }

    /// Millisecond duration attribute
    pub fn take_millis(&mut self, key: &str) -> StashResult<Option<Duration>> {
        self.take(key)
            .map(|v| {
                v.parse::<u64>().map(Duration::from_millis).map_err(|_| {
                    StashError::invalid_config(format!("{key} must be milliseconds, got {v:?}"))
                })
            })
            .transpose()
    }

    /// Reject unrecognized keys
    pub fn finish(self, backend: &str) -> StashResult<()> {
        if self.remaining.is_empty() {
            return Ok(());
        }
        let keys: Vec<&str> = self.remaining.keys().map(String::as_str).collect();
        Err(StashError::invalid_config(format!(
            "unknown {backend} storage attribute(s): {}",
            keys.join(", ")
        )))
    }
}

/// Timeouts and credentials shared by the network backends
#[derive(Debug, Clone, Default)]
pub struct NetworkAttributes {
    pub connect_timeout: Option<Duration>,
    pub operation_timeout: Option<Duration>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl NetworkAttributes {
    pub fn take_from(attrs: &mut Attributes) -> StashResult<Self> {
        Ok(Self {
            connect_timeout: attrs.take_millis("connect-timeout")?,
            operation_timeout: attrs.take_millis("operation-timeout")?,
            username: attrs.take("username"),
            password: attrs.take("password"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_and_attributes() {
        let spec: StorageSpec = "redis://localhost:6379|connect-timeout=50|read-only"
            .parse()
            .unwrap();
        assert_eq!(spec.url.scheme(), "redis");
        assert_eq!(spec.attributes["connect-timeout"], "50");
        assert_eq!(spec.attributes["read-only"], "true");
    }

    #[test]
    fn multiple_specs() {
        let specs = parse_specs("file:///tmp/a  http://host/cache|namespace=x\n").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].attributes["namespace"], "x");
        assert!(parse_specs("").unwrap().is_empty());
    }

    #[test]
    fn bad_url_is_invalid_config() {
        assert!(matches!(
            "not a url".parse::<StorageSpec>(),
            Err(StashError::InvalidConfig(_))
        ));
        assert!(matches!(
            "|a=b".parse::<StorageSpec>(),
            Err(StashError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unknown_attribute_rejected() {
        let spec: StorageSpec = "redis://h|bogus=1|connect-timeout=5".parse().unwrap();
        let mut attrs = spec.attributes();
        NetworkAttributes::take_from(&mut attrs).unwrap();
        let err = attrs.finish("redis").unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn timeouts_must_be_numeric() {
        let spec: StorageSpec = "redis://h|operation-timeout=soon".parse().unwrap();
        assert!(NetworkAttributes::take_from(&mut spec.attributes()).is_err());
    }

    #[test]
    fn password_is_redacted() {
        let spec: StorageSpec = "redis://user:hunter2@h:1|password=hunter3".parse().unwrap();
        let shown = spec.to_string();
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("hunter3"));
    }
}
