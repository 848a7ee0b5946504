//! Header Cache Adapter
//!
//! Maintains a local, durable, queryable replica of the message headers
//! held by a remote message service. This adapter handles all calls to the
//! remote for header metadata, keeping callers on fast local range scans.
//!
//! Features:
//! - Range lookups by arrival time and by expiry time over ordered indexes
//! - Lazy, throttled, single-flight synchronization with the remote
//! - Idempotent inserts keyed by header identifier
//! - Pruning of expired headers in atomic batches
//! - Optional background refresher

pub mod cache;
pub mod clock;
pub mod error;
pub mod keys;
pub mod refresher;
pub mod rpc_client;
pub mod store;

pub use cache::{CacheOptions, CacheStats, HeaderCache, SyncOutcome, DEFAULT_MIN_REFRESH_INTERVAL};
pub use clock::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
pub use error::{HeaderCacheError, Result};
pub use header_types::MessageHeader;
pub use refresher::HeaderRefresher;
pub use rpc_client::{HeaderSource, HttpHeaderSource, StatusResponse, StorageStatus};
pub use store::{KeyValueStore, RedbStore, StoreError, WriteBatch};
