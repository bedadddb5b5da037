use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::rate_limit::{LimitStats, RateLimitConfig, RateLimiter};
use crate::storage::Storage;
use std::sync::Arc;
use tracing::{debug, info};

/// Human-readable wait, e.g. "Please wait 45 seconds before trying again".
pub fn format_wait(secs: u64) -> String {
    let (amount, unit) = if secs < 60 {
        (secs.max(1), "second")
    } else if secs < 3_600 {
        (secs.div_ceil(60), "minute")
    } else {
        (secs.div_ceil(3_600), "hour")
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("Please wait {} {}{} before trying again", amount, unit, plural)
}

/// Check every limiter in order; consume on all of them only if all admit.
///
/// The first denial returns [`Error::RateLimitExceeded`] naming that window,
/// and no limiter is consumed.
pub fn check_all_limits<S: Storage>(limiters: &[RateLimiter<S>]) -> Result<()> {
    for limiter in limiters {
        let check = limiter.check_limit()?;
        if !check.allowed {
            info!(
                window = %limiter.name(),
                retry_after_secs = check.retry_after_secs,
                "rate limit exceeded"
            );
            return Err(Error::RateLimitExceeded {
                window: limiter.name().to_string(),
                retry_after_secs: check.retry_after_secs,
                wait: format_wait(check.retry_after_secs),
            });
        }
    }

    for limiter in limiters {
        limiter.consume()?;
    }
    debug!(windows = limiters.len(), "request admitted by all rate windows");
    Ok(())
}

/// Ordered set of named windows, tightest first.
pub struct LimiterSet<S> {
    limiters: Vec<RateLimiter<S>>,
}

impl<S: Storage> LimiterSet<S> {
    pub fn new(limiters: Vec<RateLimiter<S>>) -> Self {
        LimiterSet { limiters }
    }

    /// Build one limiter per config over a shared store and clock.
    pub fn from_configs(
        configs: Vec<RateLimitConfig>,
        storage: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiters = configs
            .into_iter()
            .map(|config| RateLimiter::new(config, Arc::clone(&storage), Arc::clone(&clock)))
            .collect();
        LimiterSet { limiters }
    }

    pub fn get(&self, name: &str) -> Option<&RateLimiter<S>> {
        self.limiters.iter().find(|l| l.name() == name)
    }

    pub fn limiters(&self) -> &[RateLimiter<S>] {
        &self.limiters
    }

    pub fn check_all_limits(&self) -> Result<()> {
        check_all_limits(&self.limiters)
    }

    pub fn stats(&self) -> Result<Vec<(String, LimitStats)>> {
        self.limiters
            .iter()
            .map(|l| Ok((l.name().to_string(), l.get_stats()?)))
            .collect()
    }

    pub fn reset_all(&self) -> Result<()> {
        for limiter in &self.limiters {
            limiter.reset()?;
        }
        Ok(())
    }
}
