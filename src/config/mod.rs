//! Configuration management for objstash
//!
//! Values come from the config file, then `OBJSTASH_*` environment
//! variables, which win.

pub mod schema;

pub use schema::{format_size, parse_duration, parse_size, Config};

use crate::error::{StashError, StashResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use toml_edit::DocumentMut;
use tracing::{debug, info};

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "OBJSTASH_CONFIG";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Config manager for `$OBJSTASH_CONFIG` or the default path
    pub fn new() -> Self {
        let config_path = std::env::var_os(CONFIG_PATH_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_config_path);
        Self { config_path }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("objstash")
            .join("config.toml")
    }

    /// Load the effective configuration: file, then environment, validated
    pub async fn load(&self) -> StashResult<Config> {
        let mut config = self.load_file().await?;
        apply_env(&mut config, |name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load only what the file says, defaults if it is absent
    pub async fn load_file(&self) -> StashResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> StashResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StashError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| StashError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> StashResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        self.write(&content).await?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Set `section.field` to `value`, keeping the rest of the file as is.
    ///
    /// The value is typed by what the schema accepts: booleans and numbers
    /// first, then a string, then a whitespace-separated list.
    pub async fn set(&self, key: &str, value: &str) -> StashResult<()> {
        let (section, field) = key
            .split_once('.')
            .filter(|(s, f)| !s.is_empty() && !f.is_empty() && !f.contains('.'))
            .ok_or_else(|| {
                StashError::User(format!("expected a key like cache.max_size, got {key:?}"))
            })?;
        if !is_known_key(section, field) {
            return Err(StashError::User(format!("unknown configuration key {key:?}")));
        }

        let existing = if self.config_path.exists() {
            fs::read_to_string(&self.config_path).await.map_err(|e| {
                StashError::io(format!("reading config from {}", self.config_path.display()), e)
            })?
        } else {
            String::new()
        };
        let doc: DocumentMut = existing.parse().map_err(|e: toml_edit::TomlError| {
            StashError::ConfigInvalid {
                path: self.config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut last_error = None;
        for candidate in candidates(value) {
            let mut attempt = doc.clone();
            if !attempt.contains_key(section) {
                attempt[section] = toml_edit::table();
            }
            attempt[section][field] = candidate;
            let rendered = attempt.to_string();
            match toml::from_str::<Config>(&rendered)
                .map_err(StashError::from)
                .and_then(|c| c.validate())
            {
                Ok(()) => {
                    self.ensure_config_dir().await?;
                    self.write(&rendered).await?;
                    info!("Set {} in {}", key, self.config_path.display());
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| StashError::User(format!("invalid value {value:?}"))))
    }

    async fn write(&self, content: &str) -> StashResult<()> {
        fs::write(&self.config_path, content).await.map_err(|e| {
            StashError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> StashResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StashError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn is_known_key(section: &str, field: &str) -> bool {
    // Unset optional fields do not serialize.
    if (section, field) == ("cache", "dir") {
        return true;
    }
    toml::Value::try_from(Config::default())
        .ok()
        .and_then(|v| v.get(section)?.get(field).cloned())
        .is_some()
}

fn candidates(value: &str) -> Vec<toml_edit::Item> {
    let mut out = Vec::new();
    if let Ok(b) = value.parse::<bool>() {
        out.push(toml_edit::value(b));
    }
    if let Ok(i) = value.parse::<i64>() {
        out.push(toml_edit::value(i));
    }
    if let Ok(f) = value.parse::<f64>() {
        out.push(toml_edit::value(f));
    }
    out.push(toml_edit::value(value));
    let mut list = toml_edit::Array::new();
    for part in value.split_whitespace() {
        list.push(part);
    }
    out.push(toml_edit::value(list));
    out
}

/// Apply `OBJSTASH_*` overrides using `lookup` to read variables
pub fn apply_env(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> StashResult<()> {
    let get = |name: &str| lookup(&format!("OBJSTASH_{name}"));
    let number = |name: &str, v: &str| -> StashResult<i64> {
        v.trim().parse().map_err(|_| {
            StashError::invalid_config(format!("OBJSTASH_{name}: expected a number, got {v:?}"))
        })
    };

    if let Some(v) = get("DIR").filter(|v| !v.is_empty()) {
        config.cache.dir = Some(PathBuf::from(v));
    }
    if let Some(v) = get("MAXSIZE") {
        parse_size(&v)?;
        config.cache.max_size = v;
    }
    if let Some(v) = get("MAXFILES") {
        config.cache.max_files = number("MAXFILES", &v)?.max(0) as u64;
    }
    if let Some(v) = get("NLEVELS") {
        config.cache.levels = number("NLEVELS", &v)?.max(0) as usize;
    }
    if let Some(v) = get("LIMIT_MULTIPLE") {
        config.cache.limit_multiple = v.trim().parse().map_err(|_| {
            StashError::invalid_config(format!("OBJSTASH_LIMIT_MULTIPLE: invalid value {v:?}"))
        })?;
    }
    if let Some(v) = get("READONLY") {
        config.cache.read_only = parse_flag("READONLY", &v)?;
    }
    if let Some(v) = get("COMPRESS") {
        config.compression.enabled = parse_flag("COMPRESS", &v)?;
    }
    if let Some(v) = get("COMPRESSLEVEL") {
        let level = number("COMPRESSLEVEL", &v)?;
        config.compression.level = i32::try_from(level).map_err(|_| {
            StashError::invalid_config(format!("OBJSTASH_COMPRESSLEVEL: {level} is out of range"))
        })?;
    }
    if let Some(v) = get("SECONDARY") {
        config.secondary.storage = v.split_whitespace().map(str::to_string).collect();
    }
    if let Some(v) = get("DIRECT") {
        config.manifest.direct_mode = parse_flag("DIRECT", &v)?;
    }
    Ok(())
}

/// A set-but-empty flag variable means true
fn parse_flag(name: &str, v: &str) -> StashResult<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StashError::invalid_config(format!(
            "OBJSTASH_{name}: expected true or false, got {v:?}"
        ))),
    }
}
