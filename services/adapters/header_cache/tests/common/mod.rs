//! Shared fixtures for header cache integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use header_cache_adapter::{
    CacheOptions, HeaderCache, HeaderCacheError, HeaderSource, KeyValueStore, ManualTimeProvider,
    MessageHeader, Result, StatusResponse, StorageStatus, TimeProvider,
};
use header_types::IDENTIFIER_HEX_LEN;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const T0: u32 = 1_700_000_000;

/// In-process remote whose clock is the test's manual clock
pub struct MockSource {
    pub clock: Arc<ManualTimeProvider>,
    headers: Mutex<Vec<MessageHeader>>,
    pub fail_time: AtomicBool,
    pub fail_headers: AtomicBool,
    pub time_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub last_since: Mutex<Option<u32>>,
    /// Delay inside `server_time`, widens race windows
    pub latency: Duration,
}

impl MockSource {
    pub fn new(clock: Arc<ManualTimeProvider>) -> Self {
        Self {
            clock,
            headers: Mutex::new(Vec::new()),
            fail_time: AtomicBool::new(false),
            fail_headers: AtomicBool::new(false),
            time_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            last_since: Mutex::new(None),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn publish(&self, header: MessageHeader) {
        self.headers.lock().push(header);
    }

    pub fn time_calls(&self) -> usize {
        self.time_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeaderSource for MockSource {
    async fn status(&self) -> Result<StatusResponse> {
        Ok(StatusResponse {
            pubkey: format!("02{}", "ab".repeat(32)),
            storage: StorageStatus {
                messages: self.headers.lock().len() as u64,
                max_file_size: 268_435_456,
                capacity: 137_438_953_472,
                used: 0,
            },
        })
    }

    async fn server_time(&self) -> Result<u32> {
        self.time_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail_time.load(Ordering::SeqCst) {
            return Err(HeaderCacheError::Remote {
                endpoint: "api/time/".to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }
        Ok(self.clock.now())
    }

    async fn headers_since(&self, since: u32) -> Result<Vec<MessageHeader>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_since.lock() = Some(since);
        if self.fail_headers.load(Ordering::SeqCst) {
            return Err(HeaderCacheError::Remote {
                endpoint: format!("api/header/list/since/{}", since),
                message: "connection reset".to_string(),
            });
        }
        Ok(self
            .headers
            .lock()
            .iter()
            .filter(|h| h.arrival_time() >= since)
            .cloned()
            .collect())
    }
}

/// Header with a distinct identifier per `seed`
pub fn header(seed: u8, arrival: u32, expire: u32) -> MessageHeader {
    let identifier = format!("02{:02x}{}", seed, "5".repeat(IDENTIFIER_HEX_LEN - 4));
    MessageHeader::new(&identifier, arrival, expire).unwrap()
}

pub async fn open_cache(
    dir: &Path,
    source: Arc<MockSource>,
    min_refresh_interval: Duration,
) -> HeaderCache {
    let clock: Arc<dyn TimeProvider> = source.clock.clone();
    HeaderCache::open_with(
        source,
        &dir.join("headers.redb"),
        clock,
        CacheOptions {
            min_refresh_interval,
        },
    )
    .await
    .unwrap()
}

pub async fn open_cache_on_store(
    store: Arc<dyn KeyValueStore>,
    source: Arc<MockSource>,
    min_refresh_interval: Duration,
) -> HeaderCache {
    let clock: Arc<dyn TimeProvider> = source.clock.clone();
    HeaderCache::open_with_store(
        source,
        store,
        clock,
        CacheOptions {
            min_refresh_interval,
        },
    )
    .await
    .unwrap()
}
