use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use usage_gate::clock::{Clock, ManualClock};
use usage_gate::config::parse_rate_limits;
use usage_gate::error::{Error, ErrorKind};
use usage_gate::rate_limit::{LimiterSet, RateLimitConfig, RateLimiter};
use usage_gate::storage::{FileStorage, MemoryStorage};

const START: i64 = 1_760_529_600_000;

fn burst_and_hourly(clock: &ManualClock) -> LimiterSet<MemoryStorage> {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    LimiterSet::from_configs(
        vec![
            RateLimitConfig::new("burst", 2, Duration::from_secs(1)).unwrap(),
            RateLimitConfig::new("hourly", 100, Duration::from_secs(3_600)).unwrap(),
        ],
        Arc::new(MemoryStorage::new()),
        clock,
    )
}

#[test]
fn test_window_boundary_is_exclusive() {
    let clock = ManualClock::new(START);
    let limiter = RateLimiter::new(
        RateLimitConfig::new("minute", 1, Duration::from_secs(60)).unwrap(),
        Arc::new(MemoryStorage::new()),
        Arc::new(clock.clone()),
    );
    limiter.consume().unwrap();

    clock.set(START + 59_999);
    let check = limiter.check_limit().unwrap();
    assert!(!check.allowed);
    assert_eq!(check.retry_after_secs, 1);

    // Exactly one window later the timestamp no longer counts
    clock.set(START + 60_000);
    let check = limiter.check_limit().unwrap();
    assert!(check.allowed);
    assert_eq!(check.remaining, 1);
    assert_eq!(check.retry_after_secs, 0);
}

#[test]
fn test_composite_all_or_nothing() {
    let clock = ManualClock::new(START);
    let limiters = burst_and_hourly(&clock);

    limiters.check_all_limits().unwrap();
    limiters.check_all_limits().unwrap();

    let err = limiters.check_all_limits().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimit);
    assert!(matches!(err, Error::RateLimitExceeded { ref window, .. } if window == "burst"));
    assert!(err.to_string().contains("Please wait 1 second"));

    // The denied attempt did not reach the hourly window
    assert_eq!(limiters.get("hourly").unwrap().get_stats().unwrap().used, 2);

    clock.advance(Duration::from_millis(1_001));
    limiters.check_all_limits().unwrap();
    let stats = limiters.stats().unwrap();
    assert_eq!(stats[0].1.used, 1);
    assert_eq!(stats[1].1.used, 3);
    assert_eq!(stats[1].1.remaining, 97);
}

#[test]
fn test_retry_after_decreases_as_time_passes() {
    let clock = ManualClock::new(START);
    let limiter = RateLimiter::new(
        RateLimitConfig::new("hour", 1, Duration::from_secs(3_600)).unwrap(),
        Arc::new(MemoryStorage::new()),
        Arc::new(clock.clone()),
    );
    limiter.consume().unwrap();

    let mut previous = u64::MAX;
    for _ in 0..6 {
        let check = limiter.check_limit().unwrap();
        assert!(!check.allowed);
        assert!(check.retry_after_secs <= previous);
        assert!(check.retry_after_secs > 0);
        previous = check.retry_after_secs;
        clock.advance(Duration::from_secs(600));
    }
    assert!(limiter.check_limit().unwrap().allowed);
}

#[test]
fn test_windows_shared_through_file_storage() {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::with_dirs(
        temp_dir.path().join("ledgers"),
        temp_dir.path().join("windows"),
    ));
    let clock = ManualClock::new(START);
    let configs = parse_rate_limits("minute=2/60").unwrap();

    let first = LimiterSet::from_configs(configs.clone(), Arc::clone(&storage), Arc::new(clock.clone()));
    first.check_all_limits().unwrap();
    first.check_all_limits().unwrap();

    // A second set over the same directory sees the same window
    let second = LimiterSet::from_configs(configs, storage, Arc::new(clock.clone()));
    assert!(second.check_all_limits().is_err());

    second.reset_all().unwrap();
    assert!(first.check_all_limits().is_ok());
}

proptest! {
    #[test]
    fn prop_admitted_never_exceeds_max(
        max in 1u32..6,
        window_ms in 100u64..5_000,
        gaps in proptest::collection::vec(0u64..2_000, 1..60),
    ) {
        let clock = ManualClock::new(START);
        let limiter = RateLimiter::new(
            RateLimitConfig::new("prop", max, Duration::from_millis(window_ms)).unwrap(),
            Arc::new(MemoryStorage::new()),
            Arc::new(clock.clone()),
        );

        for gap in gaps {
            clock.advance(Duration::from_millis(gap));
            let check = limiter.check_limit().unwrap();
            if check.allowed {
                prop_assert_eq!(check.retry_after_secs, 0);
                limiter.consume().unwrap();
            } else {
                prop_assert!(check.retry_after_secs >= 1);
            }
            let stats = limiter.get_stats().unwrap();
            prop_assert!(stats.used <= max);
            prop_assert_eq!(stats.used + stats.remaining, max);
        }
    }
}
