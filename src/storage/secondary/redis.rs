//! Redis remote
//!
//! Keys are `<namespace>:<digest><kind>`. The connection is opened on first
//! use and driven by a private single-threaded runtime, so callers stay
//! synchronous. Do not call into this backend from inside another tokio
//! runtime.
//!
//! Connection lifecycle:
//!
//! | From | Event | To |
//! |------|-------|----|
//! | Disconnected | handshake succeeds | Connected |
//! | Disconnected | address rejected, connect fails, auth fails | Invalid |
//! | Connected | connection breaks | Disconnected (one retry) |
//!
//! Invalid is terminal for the life of the instance.

use super::spec::{Attributes, NetworkAttributes};
use super::SecondaryStorage;
use crate::error::{StashError, StashResult};
use crate::storage::CacheKey;
use bytes::Bytes;
use fred::clients::Client;
use fred::error::{Error as RedisError, ErrorKind};
use fred::interfaces::{ClientLike, KeysInterface};
use fred::types::config::Config as RedisConfig;
use fred::types::{Builder, SetOptions, Value};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the backend is in its connection lifecycle
pub enum ConnectionState {
    Disconnected,
    Connected(Client),
    Invalid(String),
}

impl ConnectionState {
    fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected(_) => "connected",
            Self::Invalid(_) => "invalid",
        }
    }
}

pub struct RedisStorage {
    name: String,
    namespace: String,
    config: Option<RedisConfig>,
    connect_timeout: Duration,
    operation_timeout: Duration,
    runtime: Option<Runtime>,
    state: ConnectionState,
}

impl RedisStorage {
    pub fn new(url: &Url, namespace: &str, mut attrs: Attributes) -> StashResult<Self> {
        let net = NetworkAttributes::take_from(&mut attrs)?;
        attrs.finish("redis")?;

        let mut redacted = url.clone();
        if redacted.password().is_some() {
            let _ = redacted.set_password(Some("*****"));
        }
        let name = redacted.to_string();

        let (config, state) = match RedisConfig::from_url(url.as_str()) {
            Ok(mut config) => {
                if net.username.is_some() {
                    config.username = net.username;
                }
                if net.password.is_some() {
                    config.password = net.password;
                }
                (Some(config), ConnectionState::Disconnected)
            }
            Err(e) => (
                None,
                ConnectionState::Invalid(format!("unusable address: {}", e.details())),
            ),
        };

        Ok(Self {
            name,
            namespace: namespace.to_string(),
            config,
            connect_timeout: net.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            operation_timeout: net.operation_timeout.unwrap_or(DEFAULT_OPERATION_TIMEOUT),
            runtime: None,
            state,
        })
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    fn key_string(&self, key: &CacheKey) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn invalidate(&mut self, reason: String) -> StashError {
        warn!("Redis {} marked invalid: {}", self.name, reason);
        self.state = ConnectionState::Invalid(reason.clone());
        StashError::unavailable(self.name.clone(), reason)
    }

    /// Client for the next command, connecting if needed
    fn connect(&mut self) -> StashResult<Client> {
        match &self.state {
            ConnectionState::Connected(client) => return Ok(client.clone()),
            ConnectionState::Invalid(reason) => {
                return Err(StashError::unavailable(self.name.clone(), reason.clone()))
            }
            ConnectionState::Disconnected => {}
        }

        let Some(config) = self.config.clone() else {
            return Err(self.invalidate("no usable configuration".into()));
        };
        if self.runtime.is_none() {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| StashError::io("starting redis runtime", e))?;
            self.runtime = Some(rt);
        }

        let connect_timeout = self.connect_timeout;
        let operation_timeout = self.operation_timeout;
        let mut builder = Builder::from_config(config);
        builder
            .with_connection_config(|c| {
                c.connection_timeout = connect_timeout;
            })
            .with_performance_config(|p| {
                p.default_command_timeout = operation_timeout;
            });
        let client = match builder.build() {
            Ok(c) => c,
            Err(e) => return Err(self.invalidate(format!("client setup: {}", e.details()))),
        };

        let handshake = {
            let client = client.clone();
            let rt = self.runtime.as_ref().ok_or_else(|| {
                StashError::Internal("redis runtime missing after start".into())
            })?;
            rt.block_on(async move {
                tokio::time::timeout(connect_timeout, client.init())
                    .await
                    .map_err(|_| RedisError::new(ErrorKind::Timeout, "connect timed out"))?
            })
        };

        match handshake {
            Ok(_) => {
                info!("Redis {} connected", self.name);
                self.state = ConnectionState::Connected(client.clone());
                Ok(client)
            }
            Err(e) if *e.kind() == ErrorKind::Auth || is_auth_reply(&e) => {
                Err(self.invalidate(format!("authentication failed: {}", e.details())))
            }
            Err(e) => Err(self.invalidate(format!("connect failed: {}", e.details()))),
        }
    }

    /// Run one command, reconnecting once if the connection broke
    fn execute<T, F, Fut>(&mut self, what: &str, op: F) -> StashResult<T>
    where
        F: Fn(Client) -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        let mut retried = false;
        loop {
            let client = self.connect()?;
            let rt = self
                .runtime
                .as_ref()
                .ok_or_else(|| StashError::Internal("redis runtime missing".into()))?;
            match rt.block_on(op(client.clone())) {
                Ok(v) => return Ok(v),
                Err(e) if !retried && is_connection_error(&e, &client) => {
                    debug!(
                        "Redis {} {} lost connection ({}); reconnecting",
                        self.name,
                        what,
                        self.state.label()
                    );
                    self.state = ConnectionState::Disconnected;
                    retried = true;
                }
                Err(e) if *e.kind() == ErrorKind::Timeout => {
                    return Err(StashError::Timeout {
                        what: format!("redis {what}"),
                        waited: self.operation_timeout,
                    })
                }
                Err(e) => {
                    return Err(StashError::unavailable(
                        self.name.clone(),
                        format!("{what}: {}", e.details()),
                    ))
                }
            }
        }
    }
}

fn is_auth_reply(e: &RedisError) -> bool {
    let details = e.details();
    details.contains("WRONGPASS") || details.contains("NOAUTH") || details.contains("invalid password")
}

fn is_connection_error(e: &RedisError, client: &Client) -> bool {
    matches!(e.kind(), ErrorKind::IO | ErrorKind::Canceled) || !client.is_connected()
}

impl SecondaryStorage for RedisStorage {
    fn get(&mut self, key: &CacheKey) -> StashResult<Option<Vec<u8>>> {
        let k = self.key_string(key);
        debug!("Redis GET {}", k);
        let value: Option<Bytes> = self.execute("GET", |c| {
            let k = k.clone();
            async move { c.get(k).await }
        })?;
        Ok(value.map(|b| b.to_vec()))
    }

    fn put(&mut self, key: &CacheKey, value: &[u8], only_if_absent: bool) -> StashResult<bool> {
        let k = self.key_string(key);
        debug!("Redis SET {} ({} bytes)", k, value.len());
        let payload = Bytes::copy_from_slice(value);
        let options = only_if_absent.then_some(SetOptions::NX);
        let reply: Option<String> = self.execute("SET", |c| {
            let k = k.clone();
            let payload = payload.clone();
            let options = options.clone();
            async move { c.set(k, Value::Bytes(payload), None, options, false).await }
        })?;
        // NX yields nil when the key already existed.
        Ok(reply.is_some())
    }

    fn remove(&mut self, key: &CacheKey) -> StashResult<bool> {
        let k = self.key_string(key);
        debug!("Redis DEL {}", k);
        let removed: i64 = self.execute("DEL", |c| {
            let k = k.clone();
            async move { c.del(k).await }
        })?;
        Ok(removed > 0)
    }
}

impl Drop for RedisStorage {
    fn drop(&mut self) {
        if let (ConnectionState::Connected(client), Some(rt)) = (&self.state, &self.runtime) {
            let client = client.clone();
            let _ = rt.block_on(async move { client.quit().await });
        }
    }
}
