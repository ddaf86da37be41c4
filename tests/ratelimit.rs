//! The rate limiter through the crate-root exports.

use docdiff::{RateLimitError, RateLimitUsage, RateLimits, TokenRateLimiter};
use std::time::Duration;

#[test]
fn usage_reports_window_totals() {
    let limiter = TokenRateLimiter::new(RateLimits {
        rpm: 2,
        tpm: 1_000,
        window: Duration::from_secs(60),
    });
    limiter.try_acquire(400).unwrap();
    limiter.try_acquire(100).unwrap();
    assert!(matches!(
        limiter.try_acquire(1),
        Err(RateLimitError::RequestsExceeded { count: 2, limit: 2 })
    ));

    let usage: RateLimitUsage = limiter.usage();
    assert_eq!(usage.current_rpm, 2);
    assert_eq!(usage.current_tpm, 500);
    assert_eq!(usage.remaining_rpm, 0);
    assert_eq!(usage.remaining_tpm, 500);
}
