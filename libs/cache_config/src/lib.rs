//! # Header Cache Configuration
//!
//! Layered configuration for the header cache service.
//!
//! Sources are applied in order, later ones winning:
//!
//! 1. Built-in defaults
//! 2. Base TOML file (`config/header_cache.toml` unless a path is given)
//! 3. Environment overlay `config/environments/<env>.toml`
//! 4. Environment variables, e.g. `HEADER_CACHE_REMOTE__HOST=msg.example.org`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cache_config::load_config;
//!
//! let config = load_config(None, Some("production")).unwrap();
//! println!("remote: {}", config.remote.base_url());
//! ```

pub mod cache_config;

pub use cache_config::{
    load_config, HeaderCacheConfig, LoggingConfig, RemoteConfig, StorageConfig, SyncConfig,
};
