//! Injectable wall-clock source
//!
//! Header timestamps are 32-bit Unix seconds, so the clock speaks `u32`.
//! [`ManualTimeProvider`] lets tests walk time across throttle windows and
//! expiry boundaries without sleeping.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait TimeProvider: Send + Sync {
    /// Current Unix time in seconds
    fn now(&self) -> u32;
}

/// Wall clock. Falls back to 0 before the epoch and saturates past 2106.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    #[inline]
    fn now(&self) -> u32 {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        u32::try_from(secs).unwrap_or(u32::MAX)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualTimeProvider {
    now: AtomicU32,
}

impl ManualTimeProvider {
    pub fn new(start: u32) -> Self {
        Self {
            now: AtomicU32::new(start),
        }
    }

    pub fn set(&self, now: u32) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u32) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.saturating_add(secs))
            });
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_is_recent() {
        // 2020-01-01
        assert!(SystemTimeProvider.now() > 1_577_836_800);
    }

    #[test]
    fn test_manual_time() {
        let clock = ManualTimeProvider::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(50);
        assert_eq!(clock.now(), 150);
        clock.set(10);
        assert_eq!(clock.now(), 10);
        clock.set(u32::MAX - 1);
        clock.advance(10);
        assert_eq!(clock.now(), u32::MAX);
    }
}
