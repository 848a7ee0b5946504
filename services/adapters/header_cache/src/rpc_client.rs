//! Client for the remote message service
//!
//! Three read-only endpoints are consumed, all relative to the service's
//! base URL:
//!
//! - `api/status/`                       service identity and storage usage
//! - `api/time/`                         the service's clock
//! - `api/header/list/since/<unix secs>` headers that arrived at or after a time
//!
//! The cache only talks to the remote through [`HeaderSource`], so tests
//! can substitute an in-process source.

use async_trait::async_trait;
use header_types::MessageHeader;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{HeaderCacheError, Result};

pub const API_STATUS: &str = "api/status/";
pub const API_TIME: &str = "api/time/";
pub const API_HEADERS_SINCE: &str = "api/header/list/since/";

/// `GET api/status/`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub pubkey: String,
    pub storage: StorageStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStatus {
    pub messages: u64,
    pub max_file_size: u64,
    pub capacity: u64,
    pub used: u64,
}

/// `GET api/time/`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeResponse {
    pub time: u64,
}

/// `GET api/header/list/since/<t>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderListResponse {
    pub header_list: Vec<String>,
}

/// Authoritative source of message headers
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Where the source lives, for error reports
    fn base_url(&self) -> &str {
        "in-process"
    }

    async fn status(&self) -> Result<StatusResponse>;

    /// Remote clock, Unix seconds
    async fn server_time(&self) -> Result<u32>;

    /// Every header whose arrival time is `>= since`
    async fn headers_since(&self, since: u32) -> Result<Vec<MessageHeader>>;
}

/// [`HeaderSource`] over HTTP/JSON
pub struct HttpHeaderSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpHeaderSource {
    /// Create a client for `base_url` (a trailing `/` is added if missing)
    ///
    /// Connections are pooled and kept alive; the cache issues two or three
    /// requests per sync pass against the same host.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                HeaderCacheError::InvalidConfiguration(format!(
                    "Failed to create HTTP client: {}",
                    e
                ))
            })?;

        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };

        Ok(Self { base_url, client })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HeaderCacheError::Remote {
                endpoint: url.clone(),
                message: e.to_string(),
            })?;

        let body = response.bytes().await.map_err(|e| HeaderCacheError::Remote {
            endpoint: url.clone(),
            message: e.to_string(),
        })?;

        serde_json::from_slice(&body).map_err(|e| HeaderCacheError::MalformedResponse {
            endpoint: url,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl HeaderSource for HttpHeaderSource {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn status(&self) -> Result<StatusResponse> {
        self.get_json(API_STATUS).await
    }

    async fn server_time(&self) -> Result<u32> {
        let response: TimeResponse = self.get_json(API_TIME).await?;
        u32::try_from(response.time).map_err(|_| HeaderCacheError::MalformedResponse {
            endpoint: format!("{}{}", self.base_url, API_TIME),
            reason: format!("time {} does not fit in 32 bits", response.time),
        })
    }

    async fn headers_since(&self, since: u32) -> Result<Vec<MessageHeader>> {
        let path = format!("{}{}", API_HEADERS_SINCE, since);
        let response: HeaderListResponse = self.get_json(&path).await?;

        response
            .header_list
            .iter()
            .map(|raw| {
                MessageHeader::parse(raw).map_err(|e| HeaderCacheError::MalformedResponse {
                    endpoint: format!("{}{}", self.base_url, path),
                    reason: format!("invalid header: {}", e),
                })
            })
            .collect()
    }
}
