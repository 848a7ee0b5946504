//! Header cache with lazy remote synchronization
//!
//! The cache keeps a durable local replica of the remote service's message
//! headers and serves point and range lookups from it. There is no
//! scheduler: every lookup first runs [`HeaderCache::sync`], which is a
//! no-op inside the throttle window and otherwise
//!
//! 1. fetches the remote clock,
//! 2. prunes every header whose expiry lies before local `now`,
//! 3. pulls headers that arrived since the previous pass,
//! 4. inserts them (idempotent by identifier),
//! 5. advances `last_refresh` to the remote clock.
//!
//! A failure at any step aborts the pass before step 5, so the same window
//! is requested again next time. Steps that already committed stay
//! committed; each store write is atomic on its own.
//!
//! Only one pass runs at a time. The throttle check happens once before
//! taking the sync guard, so the common fresh path never contends on it,
//! and once more after, so callers that queued behind a running pass
//! return without repeating it.

use header_types::MessageHeader;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use cache_config::HeaderCacheConfig;

use crate::clock::{SystemTimeProvider, TimeProvider};
use crate::error::{HeaderCacheError, Result};
use crate::keys::{self, HeaderKeys, KeyRange};
use crate::rpc_client::{HeaderSource, HttpHeaderSource, StatusResponse};
use crate::store::{KeyValueStore, RedbStore, WriteBatch};

/// Default minimum spacing of sync passes
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Lookups inside this window after a completed pass skip syncing
    pub min_refresh_interval: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }
}

/// Result of one [`HeaderCache::sync`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Inside the throttle window, nothing done
    Fresh,
    Synced {
        pruned: usize,
        inserted: usize,
        server_time: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live headers in the store
    pub count: u64,
    pub last_refresh: u32,
    pub server_time: u32,
    pub sync_passes: u64,
    pub headers_inserted: u64,
    pub headers_pruned: u64,
}

/// Durable, synchronized replica of remote message headers
pub struct HeaderCache {
    source: Arc<dyn HeaderSource>,

    /// `None` once closed
    store: RwLock<Option<Arc<dyn KeyValueStore>>>,

    clock: Arc<dyn TimeProvider>,

    min_refresh_interval: u32,

    /// Single-flight guard for sync passes
    sync_lock: tokio::sync::Mutex<()>,

    /// Serializes existence checks with the writes that depend on them
    write_lock: Mutex<()>,

    /// Status reported by the remote at open
    status: StatusResponse,

    /// Remote clock at the start of the last completed pass
    last_refresh: AtomicU32,

    /// Local clock when the last pass completed, drives throttling
    last_sync_at: AtomicU32,

    server_time: AtomicU32,
    count: AtomicU64,
    sync_passes: AtomicU64,
    headers_inserted: AtomicU64,
    headers_pruned: AtomicU64,
}

impl HeaderCache {
    /// Open a cache for the configured remote and store path
    pub async fn open(config: &HeaderCacheConfig) -> Result<Self> {
        ensure_store_path(&config.storage.path)?;

        let source = HttpHeaderSource::new(&config.remote.base_url(), config.remote.request_timeout())?;
        let options = CacheOptions {
            min_refresh_interval: config.sync.min_refresh_interval(),
        };

        Self::open_with(
            Arc::new(source),
            &config.storage.path,
            Arc::new(SystemTimeProvider),
            options,
        )
        .await
    }

    /// Open with an explicit source and clock, persisting at `store_path`
    ///
    /// The path must not be empty: results are only ever kept on disk.
    pub async fn open_with(
        source: Arc<dyn HeaderSource>,
        store_path: &Path,
        clock: Arc<dyn TimeProvider>,
        options: CacheOptions,
    ) -> Result<Self> {
        ensure_store_path(store_path)?;
        refresh_interval_secs(&options)?;

        let status = fetch_status(source.as_ref()).await?;

        let store = RedbStore::open(store_path).map_err(|source| HeaderCacheError::StorageOpen {
            path: store_path.to_path_buf(),
            source,
        })?;

        Self::assemble(source, Arc::new(store), clock, options, status)
    }

    /// Open on top of an already opened store
    pub async fn open_with_store(
        source: Arc<dyn HeaderSource>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn TimeProvider>,
        options: CacheOptions,
    ) -> Result<Self> {
        refresh_interval_secs(&options)?;
        let status = fetch_status(source.as_ref()).await?;
        Self::assemble(source, store, clock, options, status)
    }

    fn assemble(
        source: Arc<dyn HeaderSource>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn TimeProvider>,
        options: CacheOptions,
        status: StatusResponse,
    ) -> Result<Self> {
        // One expiry-index entry per live header
        let count = store
            .count(&keys::full_expire_range())
            .map_err(HeaderCacheError::StorageRead)?;

        info!(
            "Header cache opened, found {} message headers (remote holds {})",
            count, status.storage.messages
        );

        let min_refresh_interval = refresh_interval_secs(&options)?;

        Ok(Self {
            source,
            store: RwLock::new(Some(store)),
            clock,
            min_refresh_interval,
            sync_lock: tokio::sync::Mutex::new(()),
            write_lock: Mutex::new(()),
            status,
            last_refresh: AtomicU32::new(0),
            last_sync_at: AtomicU32::new(0),
            server_time: AtomicU32::new(0),
            count: AtomicU64::new(count as u64),
            sync_passes: AtomicU64::new(0),
            headers_inserted: AtomicU64::new(0),
            headers_pruned: AtomicU64::new(0),
        })
    }

    /// Release the store. Safe to call more than once.
    pub fn close(&self) {
        if self.store.write().take().is_some() {
            info!("Header cache closed with {} message headers", self.count());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.store.read().is_none()
    }

    fn store(&self) -> Result<Arc<dyn KeyValueStore>> {
        self.store.read().clone().ok_or(HeaderCacheError::Closed)
    }

    /// Store a header unless one with the same identifier exists
    ///
    /// Returns `false` for an existing identifier, even when the timestamps
    /// differ; the stored record is left as it was.
    pub fn insert(&self, header: &MessageHeader) -> Result<bool> {
        let store = self.store()?;
        self.insert_into(store.as_ref(), header)
    }

    fn insert_into(&self, store: &dyn KeyValueStore, header: &MessageHeader) -> Result<bool> {
        let keys = HeaderKeys::derive(header)?;

        let _write = self.write_lock.lock();

        let existing = store
            .get(&keys.identifier)
            .map_err(HeaderCacheError::StorageRead)?;
        if existing.is_some() {
            return Ok(false);
        }

        let value = header.serialize().into_bytes();
        let mut batch = WriteBatch::new();
        batch.put(keys.arrival, value.clone());
        batch.put(keys.expire, value.clone());
        batch.put(keys.identifier, value);
        store.write(batch).map_err(HeaderCacheError::StorageWrite)?;

        self.count.fetch_add(1, Ordering::Relaxed);
        self.headers_inserted.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Delete a header's three keys. Missing keys are not an error.
    ///
    /// Index keys are derived from the stored copy when there is one, so a
    /// caller holding a record with stale timestamps still removes the
    /// entries actually on disk.
    pub fn remove(&self, header: &MessageHeader) -> Result<()> {
        let store = self.store()?;
        let requested = HeaderKeys::derive(header)?;

        let _write = self.write_lock.lock();

        let stored = store
            .get(&requested.identifier)
            .map_err(HeaderCacheError::StorageRead)?;

        let keys = match &stored {
            Some(value) => HeaderKeys::derive(&decode(&requested.identifier, value)?)?,
            None => requested,
        };

        let mut batch = WriteBatch::new();
        batch.delete(keys.arrival);
        batch.delete(keys.expire);
        batch.delete(keys.identifier);
        store.write(batch).map_err(HeaderCacheError::StorageWrite)?;

        if stored.is_some() {
            decrement(&self.count, 1);
        }
        Ok(())
    }

    /// Look up one header by its hex identifier
    pub async fn find_by_identifier(&self, identifier: &str) -> Result<MessageHeader> {
        self.sync().await?;

        let key = keys::identifier_key(identifier)?;
        let store = self.store()?;
        let value = store
            .get(&key)
            .map_err(HeaderCacheError::StorageRead)?
            .ok_or_else(|| HeaderCacheError::NotFound(identifier.to_string()))?;

        decode(&key, &value)
    }

    /// Headers that arrived at or after `timestamp`, oldest first
    pub async fn find_since(&self, timestamp: u32) -> Result<Vec<MessageHeader>> {
        self.sync().await?;
        self.scan(&keys::arrival_range(timestamp))
    }

    /// Headers expiring at or after `timestamp`, soonest first
    pub async fn find_expiring_after(&self, timestamp: u32) -> Result<Vec<MessageHeader>> {
        self.sync().await?;
        self.scan(&keys::expire_range(timestamp))
    }

    /// A single unreadable entry fails the whole scan
    fn scan(&self, range: &KeyRange) -> Result<Vec<MessageHeader>> {
        let store = self.store()?;
        store
            .scan(range)
            .map_err(HeaderCacheError::StorageRead)?
            .iter()
            .map(|(key, value)| decode(key, value))
            .collect()
    }

    fn is_fresh(&self, now: u32) -> bool {
        let last = self.last_sync_at.load(Ordering::Acquire);
        last != 0 && now.saturating_sub(last) < self.min_refresh_interval
    }

    /// Reconcile the store with the remote, see the module docs
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let now = self.clock.now();
        if self.is_fresh(now) {
            debug!("Header cache fresh, skipping sync");
            return Ok(SyncOutcome::Fresh);
        }

        let _guard = self.sync_lock.lock().await;

        let now = self.clock.now();
        if self.is_fresh(now) {
            debug!("Header cache refreshed by a concurrent pass");
            return Ok(SyncOutcome::Fresh);
        }

        let store = self.store()?;

        let server_time = self.source.server_time().await?;
        self.server_time.store(server_time, Ordering::Relaxed);

        let pruned = self.prune_expired(store.as_ref(), now)?;

        let since = self.last_refresh.load(Ordering::Acquire);
        let headers = self.source.headers_since(since).await?;

        // A listing may still carry headers that expired before `now`;
        // storing them would undo the prune above.
        let mut inserted = 0;
        let mut skipped = 0;
        for header in &headers {
            if header.is_expired(now) {
                skipped += 1;
                continue;
            }
            if self.insert_into(store.as_ref(), header)? {
                inserted += 1;
            }
        }
        if skipped > 0 {
            debug!("Skipped {} already expired headers from remote listing", skipped);
        }

        self.last_refresh.store(server_time, Ordering::Release);
        self.last_sync_at.store(now.max(1), Ordering::Release);
        self.sync_passes.fetch_add(1, Ordering::Relaxed);

        info!(
            "Header sync complete: dropped {}, inserted {} of {} listed since {}",
            pruned,
            inserted,
            headers.len(),
            since
        );

        Ok(SyncOutcome::Synced {
            pruned,
            inserted,
            server_time,
        })
    }

    /// Drop every header whose expiry lies before `now`, in one batch
    fn prune_expired(&self, store: &dyn KeyValueStore, now: u32) -> Result<usize> {
        let _write = self.write_lock.lock();

        let expired = store
            .scan(&keys::expired_before(now))
            .map_err(HeaderCacheError::StorageRead)?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for (key, value) in &expired {
            let keys = HeaderKeys::derive(&decode(key, value)?)?;
            batch.delete(keys.arrival);
            batch.delete(keys.expire);
            batch.delete(keys.identifier);
        }
        store.write(batch).map_err(HeaderCacheError::StorageWrite)?;

        let dropped = expired.len();
        decrement(&self.count, dropped as u64);
        self.headers_pruned.fetch_add(dropped as u64, Ordering::Relaxed);
        debug!("Pruned {} expired message headers", dropped);
        Ok(dropped)
    }

    /// Live headers in the store
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Remote clock of the last completed pass, 0 before the first
    pub fn last_refresh(&self) -> u32 {
        self.last_refresh.load(Ordering::Acquire)
    }

    /// Last remote clock reading, even from a pass that later failed
    pub fn server_time(&self) -> u32 {
        self.server_time.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> &StatusResponse {
        &self.status
    }

    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.min_refresh_interval))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            count: self.count(),
            last_refresh: self.last_refresh(),
            server_time: self.server_time(),
            sync_passes: self.sync_passes.load(Ordering::Relaxed),
            headers_inserted: self.headers_inserted.load(Ordering::Relaxed),
            headers_pruned: self.headers_pruned.load(Ordering::Relaxed),
        }
    }
}

fn ensure_store_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(HeaderCacheError::InvalidConfiguration(
            "refusing to open empty store path, the header cache has no in-memory mode".to_string(),
        ));
    }
    Ok(())
}

/// Throttle window in whole seconds; it is compared against u32 clocks
fn refresh_interval_secs(options: &CacheOptions) -> Result<u32> {
    let secs = options.min_refresh_interval.as_secs();
    u32::try_from(secs).map_err(|_| {
        HeaderCacheError::InvalidConfiguration(format!(
            "min_refresh_interval of {}s does not fit a 32-bit timestamp",
            secs
        ))
    })
}

async fn fetch_status(source: &dyn HeaderSource) -> Result<StatusResponse> {
    source
        .status()
        .await
        .map_err(|e| HeaderCacheError::UnreachableRemote {
            url: source.base_url().to_string(),
            message: e.to_string(),
        })
}

fn decode(key: &[u8], value: &[u8]) -> Result<MessageHeader> {
    let corrupt = |reason: String| HeaderCacheError::CorruptRecord {
        key: hex::encode(key),
        reason,
    };
    let text = std::str::from_utf8(value).map_err(|e| corrupt(e.to_string()))?;
    MessageHeader::parse(text).map_err(|e| corrupt(e.to_string()))
}

fn decrement(counter: &AtomicU64, by: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
        Some(n.saturating_sub(by))
    });
}
