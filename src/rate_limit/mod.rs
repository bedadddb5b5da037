//! Fixed-count rolling-window rate limiting.
//!
//! - [`RateLimiter`]: one window (`max_requests` per `window`) backed by a
//!   timestamp record in [`Storage`].
//! - [`LimiterSet`]: several windows checked together with all-or-nothing
//!   consumption, protecting a shared upstream independently of billing.
//!
//! A timestamp counts while it is strictly newer than `now - window`; one
//! exactly on the cutoff has expired.

pub mod composite;

pub use composite::{check_all_limits, format_wait, LimiterSet};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Configuration of one window. `name` doubles as the storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub name: String,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(name: impl Into<String>, max_requests: u32, window: Duration) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidConfig(
                "Rate limit name must not be empty".to_string(),
            ));
        }
        if max_requests == 0 {
            return Err(Error::InvalidConfig(format!(
                "Rate limit '{}' must allow at least one request",
                name
            )));
        }
        if window.as_millis() == 0 {
            return Err(Error::InvalidConfig(format!(
                "Rate limit '{}' window must be positive",
                name
            )));
        }
        Ok(RateLimitConfig {
            name,
            max_requests,
            window,
        })
    }

    pub fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Persisted timestamps of one window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateWindowRecord {
    /// Admission times in insertion order (epoch millis)
    pub timestamps: Vec<i64>,
    pub window_millis: i64,
    pub max_requests: u32,
}

impl RateWindowRecord {
    pub fn new(config: &RateLimitConfig) -> Self {
        RateWindowRecord {
            timestamps: Vec::new(),
            window_millis: config.window_millis(),
            max_requests: config.max_requests,
        }
    }

    fn cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(self.window_millis)
    }

    /// Drop timestamps outside the window. Returns how many were dropped.
    pub fn prune(&mut self, now: i64) -> usize {
        let cutoff = self.cutoff(now);
        let before = self.timestamps.len();
        self.timestamps.retain(|&ts| ts > cutoff);
        before - self.timestamps.len()
    }

    pub fn count_in_window(&self, now: i64) -> u32 {
        let cutoff = self.cutoff(now);
        let count = self.timestamps.iter().filter(|&&ts| ts > cutoff).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn oldest_in_window(&self, now: i64) -> Option<i64> {
        let cutoff = self.cutoff(now);
        self.timestamps.iter().copied().filter(|&ts| ts > cutoff).min()
    }

    /// Whole seconds until the oldest in-window timestamp ages out, rounded up.
    pub fn seconds_until_slot(&self, now: i64) -> u64 {
        match self.oldest_in_window(now) {
            Some(oldest) => {
                let millis = oldest.saturating_add(self.window_millis).saturating_sub(now).max(0);
                u64::try_from(millis).unwrap_or(0).div_ceil(1000)
            }
            None => 0,
        }
    }
}

/// Result of [`RateLimiter::check_limit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub remaining: u32,
    /// Zero whenever `allowed`
    pub retry_after_secs: u64,
}

/// Read-only snapshot of a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitStats {
    pub used: u32,
    pub remaining: u32,
    pub total: u32,
    pub reset_in_secs: u64,
}

/// One rate window over a shared store.
///
/// `consume` does not enforce the limit; callers check first (see
/// [`LimiterSet::check_all_limits`]).
pub struct RateLimiter<S> {
    config: RateLimitConfig,
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Storage> RateLimiter<S> {
    pub fn new(config: RateLimitConfig, storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        RateLimiter {
            config,
            storage,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Load (or lazily create) the record, pruned at `now`. Persists if it changed.
    fn load(&self, now: i64) -> Result<RateWindowRecord> {
        let (mut record, mut dirty) = match self.storage.load_window(&self.config.name)? {
            Some(record) => (record, false),
            None => (RateWindowRecord::new(&self.config), true),
        };

        // Config wins over whatever was persisted by an older deployment.
        if record.window_millis != self.config.window_millis()
            || record.max_requests != self.config.max_requests
        {
            record.window_millis = self.config.window_millis();
            record.max_requests = self.config.max_requests;
            dirty = true;
        }

        let dropped = record.prune(now);
        if dropped > 0 {
            debug!(window = %self.config.name, dropped, "pruned expired timestamps");
            dirty = true;
        }

        if dirty {
            self.storage.persist_window(&self.config.name, &record)?;
        }
        Ok(record)
    }

    pub fn check_limit(&self) -> Result<LimitCheck> {
        let now = self.clock.now_millis();
        let record = self.load(now)?;
        let remaining = self
            .config
            .max_requests
            .saturating_sub(record.count_in_window(now));

        if remaining == 0 {
            return Ok(LimitCheck {
                allowed: false,
                remaining: 0,
                retry_after_secs: record.seconds_until_slot(now),
            });
        }
        Ok(LimitCheck {
            allowed: true,
            remaining,
            retry_after_secs: 0,
        })
    }

    /// Record one admitted request at `now`.
    pub fn consume(&self) -> Result<()> {
        let now = self.clock.now_millis();
        let mut record = self.load(now)?;
        record.timestamps.push(now);
        self.storage.persist_window(&self.config.name, &record)
    }

    pub fn get_stats(&self) -> Result<LimitStats> {
        let now = self.clock.now_millis();
        let record = self.load(now)?;
        let used = record.count_in_window(now);
        Ok(LimitStats {
            used,
            remaining: self.config.max_requests.saturating_sub(used),
            total: self.config.max_requests,
            reset_in_secs: record.seconds_until_slot(now),
        })
    }

    /// Forget every stored timestamp.
    pub fn reset(&self) -> Result<()> {
        self.storage.remove_window(&self.config.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;

    fn limiter(max: u32, window_ms: u64) -> (RateLimiter<MemoryStorage>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let config =
            RateLimitConfig::new("test", max, Duration::from_millis(window_ms)).unwrap();
        let limiter = RateLimiter::new(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(clock.clone()),
        );
        (limiter, clock)
    }

    #[test]
    fn test_config_rejects_zero() {
        assert!(RateLimitConfig::new("x", 0, Duration::from_secs(1)).is_err());
        assert!(RateLimitConfig::new("x", 1, Duration::ZERO).is_err());
        assert!(RateLimitConfig::new("", 1, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_denies_after_max_then_recovers() {
        let (limiter, clock) = limiter(3, 10_000);
        for _ in 0..3 {
            assert!(limiter.check_limit().unwrap().allowed);
            limiter.consume().unwrap();
            clock.advance(Duration::from_millis(1_000));
        }

        let check = limiter.check_limit().unwrap();
        assert!(!check.allowed);
        assert_eq!(check.remaining, 0);
        // oldest at t0, now t0+3s, window 10s
        assert_eq!(check.retry_after_secs, 7);

        clock.advance(Duration::from_millis(7_000));
        let check = limiter.check_limit().unwrap();
        assert!(check.allowed);
        assert_eq!(check.remaining, 1);
        assert_eq!(check.retry_after_secs, 0);
    }

    #[test]
    fn test_cutoff_boundary_is_exclusive() {
        let (limiter, clock) = limiter(1, 1_000);
        limiter.consume().unwrap();
        clock.advance(Duration::from_millis(999));
        assert!(!limiter.check_limit().unwrap().allowed);
        clock.advance(Duration::from_millis(1));
        assert!(limiter.check_limit().unwrap().allowed);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let (limiter, clock) = limiter(1, 1_000);
        limiter.consume().unwrap();
        clock.advance(Duration::from_millis(600));
        let check = limiter.check_limit().unwrap();
        assert!(!check.allowed);
        assert_eq!(check.retry_after_secs, 1);
    }

    #[test]
    fn test_stats_and_reset() {
        let (limiter, clock) = limiter(5, 60_000);
        limiter.consume().unwrap();
        clock.advance(Duration::from_millis(30_000));
        limiter.consume().unwrap();

        let stats = limiter.get_stats().unwrap();
        assert_eq!(stats.used, 2);
        assert_eq!(stats.remaining, 3);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.reset_in_secs, 30);

        limiter.reset().unwrap();
        let stats = limiter.get_stats().unwrap();
        assert_eq!(stats.used, 0);
        assert_eq!(stats.reset_in_secs, 0);
    }

    #[test]
    fn test_prune_persists_trimmed_record() {
        let (limiter, clock) = limiter(5, 1_000);
        limiter.consume().unwrap();
        limiter.consume().unwrap();
        clock.advance(Duration::from_millis(5_000));
        limiter.check_limit().unwrap();

        let stored = limiter.storage.load_window("test").unwrap().unwrap();
        assert!(stored.timestamps.is_empty());
    }

    #[test]
    fn test_consume_does_not_self_enforce() {
        let (limiter, _clock) = limiter(1, 1_000);
        limiter.consume().unwrap();
        limiter.consume().unwrap();
        assert_eq!(limiter.get_stats().unwrap().used, 2);
        assert_eq!(limiter.get_stats().unwrap().remaining, 0);
    }
}
