//! Optional background refresh task
//!
//! Lookups already sync lazily. A refresher keeps the replica warm for
//! callers that read rarely, by running [`HeaderCache::sync`] on a fixed
//! period until shut down or the cache is closed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{HeaderCache, SyncOutcome};
use crate::error::HeaderCacheError;

pub struct HeaderRefresher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HeaderRefresher {
    /// Start refreshing `cache` every `period`
    pub fn spawn(cache: Arc<HeaderCache>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Header refresher started, period {:?}", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match cache.sync().await {
                            Ok(SyncOutcome::Synced { pruned, inserted, .. }) => {
                                debug!("Background sync: dropped {}, inserted {}", pruned, inserted);
                            }
                            Ok(SyncOutcome::Fresh) => {}
                            Err(HeaderCacheError::Closed) => {
                                info!("Header cache closed, refresher exiting");
                                break;
                            }
                            Err(e) => {
                                warn!("Background sync failed, retrying next tick: {}", e);
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Header refresher stopped");
        });

        Self { shutdown, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for a pass in flight to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Header refresher task ended abnormally: {}", e);
        }
    }
}
