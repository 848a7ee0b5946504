//! Header cache configuration loading
//!
//! Supports loading from TOML files with environment-specific overrides.

use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/header_cache.toml";
const ENV_PREFIX: &str = "HEADER_CACHE";

/// Main header cache configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct HeaderCacheConfig {
    /// Remote message service
    pub remote: RemoteConfig,

    /// Local persistent store
    pub storage: StorageConfig,

    /// Synchronization throttling
    pub sync: SyncConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path. Must not be empty; the cache has no in-memory mode.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum seconds between two synchronization passes
    pub min_refresh_interval_secs: u64,

    /// Run a background refresher at this period (seconds)
    pub background_refresh_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7754,
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/header_cache.redb"),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_refresh_interval_secs: 10,
            background_refresh_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl RemoteConfig {
    /// Base URL every API path is appended to, always ending in `/`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl SyncConfig {
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.min_refresh_interval_secs)
    }

    pub fn background_refresh(&self) -> Option<Duration> {
        self.background_refresh_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl HeaderCacheConfig {
    /// Load configuration from files with environment overrides
    ///
    /// An explicitly given `base_path` must exist; the default path is
    /// optional so a bare checkout runs on defaults.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = match base_path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_PATH)).required(false),
        };

        let mut builder = Config::builder().add_source(base);

        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (HEADER_CACHE_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Expand environment variables and `~` in path and host values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let raw_path = self.storage.path.to_string_lossy().into_owned();
        if !raw_path.is_empty() {
            let expanded =
                shellexpand::full(&raw_path).context("Failed to expand storage path")?;
            self.storage.path = PathBuf::from(expanded.as_ref());
        }

        let expanded = shellexpand::env(&self.remote.host).context("Failed to expand remote host")?;
        self.remote.host = expanded.to_string();

        Ok(())
    }

    /// Render as TOML, e.g. to seed a config file
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Convenience function to load configuration with expansion applied
pub fn load_config(base_path: Option<&Path>, environment: Option<&str>) -> Result<HeaderCacheConfig> {
    let mut config = HeaderCacheConfig::load(base_path, environment)?;
    config.expand_env_vars()?;
    Ok(config)
}
