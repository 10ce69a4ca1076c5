//! HTTP remote: plain GET/PUT/DELETE on `<base>/<namespace>/<key>`
//!
//! A 401 or 403 answer marks the remote invalid for the life of the
//! instance; no further requests are sent.

use super::spec::{Attributes, NetworkAttributes};
use super::SecondaryStorage;
use crate::error::{StashError, StashResult};
use crate::storage::CacheKey;
use base64::Engine as _;
use std::time::Duration;
use tracing::{debug, warn};
use ureq::Agent;
use url::Url;

/// Largest body accepted from a server
const MAX_BODY: u64 = 1 << 30;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpStorage {
    agent: Agent,
    base: String,
    authorization: Option<String>,
    operation_timeout: Duration,
    invalid: Option<String>,
}

impl HttpStorage {
    pub fn new(url: &Url, namespace: &str, mut attrs: Attributes) -> StashResult<Self> {
        let net = NetworkAttributes::take_from(&mut attrs)?;
        attrs.finish("http")?;

        let operation_timeout = net.operation_timeout.unwrap_or(DEFAULT_OPERATION_TIMEOUT);
        let config = Agent::config_builder()
            .timeout_connect(Some(net.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)))
            .timeout_global(Some(operation_timeout))
            .http_status_as_error(false)
            .build();

        // Credentials in the URL userinfo work too; attributes take precedence.
        let username = net
            .username
            .or_else(|| (!url.username().is_empty()).then(|| url.username().to_string()));
        let password = net.password.or_else(|| url.password().map(str::to_string));
        let authorization = password.map(|p| {
            let creds = format!("{}:{}", username.unwrap_or_default(), p);
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(creds)
            )
        });

        let mut clean = url.clone();
        let _ = clean.set_username("");
        let _ = clean.set_password(None);
        let base = format!("{}/{}", clean.as_str().trim_end_matches('/'), namespace);

        Ok(Self {
            agent: Agent::new_with_config(config),
            base,
            authorization,
            operation_timeout,
            invalid: None,
        })
    }

    fn url_for(&self, key: &CacheKey) -> String {
        format!("{}/{}", self.base, key)
    }

    fn unavailable(&self, e: ureq::Error) -> StashError {
        match e {
            ureq::Error::Timeout(_) => StashError::Timeout {
                what: format!("HTTP {}", self.base),
                waited: self.operation_timeout,
            },
            other => StashError::unavailable(self.base.clone(), other.to_string()),
        }
    }

    fn status_error(&mut self, method: &str, status: u16) -> StashError {
        let reason = format!("{method} returned HTTP {status}");
        if matches!(status, 401 | 403) {
            warn!("HTTP remote {} marked invalid: {}", self.base, reason);
            self.invalid = Some(reason.clone());
        }
        StashError::unavailable(self.base.clone(), reason)
    }

    fn ensure_valid(&self) -> StashResult<()> {
        match &self.invalid {
            Some(reason) => Err(StashError::unavailable(self.base.clone(), reason.clone())),
            None => Ok(()),
        }
    }
}

impl SecondaryStorage for HttpStorage {
    fn get(&mut self, key: &CacheKey) -> StashResult<Option<Vec<u8>>> {
        self.ensure_valid()?;
        let url = self.url_for(key);
        debug!("HTTP GET {}", url);
        let mut req = self.agent.get(&url);
        if let Some(auth) = &self.authorization {
            req = req.header("Authorization", auth);
        }
        let mut resp = req.call().map_err(|e| self.unavailable(e))?;
        match resp.status().as_u16() {
            200..=299 => {
                let body = resp
                    .body_mut()
                    .with_config()
                    .limit(MAX_BODY)
                    .read_to_vec()
                    .map_err(|e| self.unavailable(e))?;
                Ok(Some(body))
            }
            404 => Ok(None),
            status => Err(self.status_error("GET", status)),
        }
    }

    fn put(&mut self, key: &CacheKey, value: &[u8], only_if_absent: bool) -> StashResult<bool> {
        self.ensure_valid()?;
        let url = self.url_for(key);
        if only_if_absent {
            let mut req = self.agent.head(&url);
            if let Some(auth) = &self.authorization {
                req = req.header("Authorization", auth);
            }
            let resp = req.call().map_err(|e| self.unavailable(e))?;
            match resp.status().as_u16() {
                200..=299 => {
                    debug!("HTTP {} already present", url);
                    return Ok(false);
                }
                status @ (401 | 403) => return Err(self.status_error("HEAD", status)),
                _ => {}
            }
        }

        debug!("HTTP PUT {} ({} bytes)", url, value.len());
        let mut req = self
            .agent
            .put(&url)
            .header("Content-Type", "application/octet-stream");
        if let Some(auth) = &self.authorization {
            req = req.header("Authorization", auth);
        }
        let resp = req.send(value).map_err(|e| self.unavailable(e))?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            status => Err(self.status_error("PUT", status)),
        }
    }

    fn remove(&mut self, key: &CacheKey) -> StashResult<bool> {
        self.ensure_valid()?;
        let url = self.url_for(key);
        debug!("HTTP DELETE {}", url);
        let mut req = self.agent.delete(&url);
        if let Some(auth) = &self.authorization {
            req = req.header("Authorization", auth);
        }
        let resp = req.call().map_err(|e| self.unavailable(e))?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => Err(self.status_error("DELETE", status)),
        }
    }
}
