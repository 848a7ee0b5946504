//! Header cache error types

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, HeaderCacheError>;

#[derive(Debug, Error)]
pub enum HeaderCacheError {
    /// Initial status fetch failed; the remote is down or not a message service
    #[error("Remote unreachable at {url}: {message}")]
    UnreachableRemote { url: String, message: String },

    /// Transport or HTTP status failure on a later request
    #[error("Remote request to {endpoint} failed: {message}")]
    Remote { endpoint: String, message: String },

    #[error("Malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to open store at {path:?}: {source}")]
    StorageOpen {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("Store write failed: {0}")]
    StorageWrite(#[source] StoreError),

    #[error("Store read failed: {0}")]
    StorageRead(#[source] StoreError),

    /// Stored bytes under `key` no longer parse as a header
    #[error("Corrupt record under key {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Header not found: {0}")]
    NotFound(String),

    #[error("Cannot derive store keys for identifier {identifier}: {reason}")]
    KeyDerivation { identifier: String, reason: String },

    #[error("Header cache is closed")]
    Closed,
}

impl HeaderCacheError {
    /// Errors a caller may reasonably retry later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HeaderCacheError::UnreachableRemote { .. }
                | HeaderCacheError::Remote { .. }
                | HeaderCacheError::MalformedResponse { .. }
        )
    }
}
