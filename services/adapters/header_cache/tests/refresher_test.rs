//! Background refresher tests

mod common;

use common::{header, open_cache, MockSource, T0};
use header_cache_adapter::{HeaderRefresher, ManualTimeProvider, SystemTimeProvider, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_refresher_pulls_without_lookups() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualTimeProvider::new(T0));
    let source = Arc::new(MockSource::new(clock.clone()));
    source.publish(header(1, T0, T0 + 3600));

    // zero window so every tick runs a full pass
    let cache = Arc::new(open_cache(dir.path(), source.clone(), Duration::ZERO).await);
    let refresher = HeaderRefresher::spawn(cache.clone(), Duration::from_millis(20));

    tokio::time::sleep(Duration::from_millis(150)).await;
    refresher.shutdown().await;

    assert_eq!(cache.count(), 1);
    assert!(cache.stats().sync_passes >= 2);
    assert!(source.list_calls() >= 2);

    // nothing runs once shut down
    let calls = source.time_calls();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(source.time_calls(), calls);
}

#[tokio::test]
async fn test_refresher_exits_when_cache_closed() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualTimeProvider::new(SystemTimeProvider.now()));
    let source = Arc::new(MockSource::new(clock));
    let cache = Arc::new(open_cache(dir.path(), source, Duration::ZERO).await);

    let refresher = HeaderRefresher::spawn(cache.clone(), Duration::from_millis(10));
    cache.close();

    let mut finished = false;
    for _ in 0..50 {
        if refresher.is_finished() {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(finished);
    refresher.shutdown().await;
}

#[tokio::test]
async fn test_refresher_survives_remote_failures() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualTimeProvider::new(T0));
    let source = Arc::new(MockSource::new(clock.clone()));
    source
        .fail_time
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let cache = Arc::new(open_cache(dir.path(), source.clone(), Duration::ZERO).await);
    let refresher = HeaderRefresher::spawn(cache.clone(), Duration::from_millis(10));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!refresher.is_finished());
    assert!(source.time_calls() >= 2);
    assert_eq!(cache.last_refresh(), 0);

    source
        .fail_time
        .store(false, std::sync::atomic::Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    refresher.shutdown().await;
    assert_eq!(cache.last_refresh(), T0);
}
