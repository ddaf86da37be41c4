//! Sliding-window request and token limiter.
//!
//! [`TokenRateLimiter`] admits a request when the window holds fewer than
//! `rpm` requests and adding its estimated tokens keeps the window total at
//! or below `tpm`. Admitted requests are recorded as `(instant, tokens)` and
//! expire once they fall out of the window.
//!
//! Time comes from an injected [`Clock`] so tests can drive the window
//! without sleeping. A host builds one limiter at start-up and shares it
//! (it is `Sync`); [`TokenRateLimiter::reset`] exists for tests.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Limits enforced over one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Requests admitted per window.
    pub rpm: usize,
    /// Tokens admitted per window.
    pub tpm: u64,
    pub window: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            rpm: 100,
            tpm: 10_000,
            window: Duration::from_secs(60),
        }
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded: {count} requests in the current window (limit: {limit})")]
    RequestsExceeded { count: usize, limit: usize },

    #[error("Token limit exceeded: {tokens} tokens in the current window (limit: {limit})")]
    TokensExceeded { tokens: u64, limit: u64 },
}

/// Snapshot of the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitUsage {
    pub current_rpm: usize,
    pub current_tpm: u64,
    pub remaining_rpm: usize,
    pub remaining_tpm: u64,
    pub rpm_limit: usize,
    pub tpm_limit: u64,
}

/// Thread-safe sliding-window limiter.
#[derive(Debug)]
pub struct TokenRateLimiter<C: Clock = SystemClock> {
    limits: RateLimits,
    clock: C,
    entries: Mutex<VecDeque<(Instant, u64)>>,
}

impl TokenRateLimiter<SystemClock> {
    pub fn new(limits: RateLimits) -> Self {
        Self::with_clock(limits, SystemClock)
    }
}

impl Default for TokenRateLimiter<SystemClock> {
    fn default() -> Self {
        Self::new(RateLimits::default())
    }
}

impl<C: Clock> TokenRateLimiter<C> {
    pub fn with_clock(limits: RateLimits, clock: C) -> Self {
        info!(
            "Rate limiter initialised: RPM={}, TPM={}, window={}s",
            limits.rpm,
            limits.tpm,
            limits.window.as_secs()
        );
        Self {
            limits,
            clock,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Lock and drop expired entries. Poisoning is ignored.
    fn current(&self) -> (MutexGuard<'_, VecDeque<(Instant, u64)>>, Instant) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cutoff) = now.checked_sub(self.limits.window) {
            while entries.front().is_some_and(|(at, _)| *at < cutoff) {
                entries.pop_front();
            }
        }
        (entries, now)
    }

    /// Admit and record a request estimated at `tokens`, or refuse it.
    pub fn try_acquire(&self, tokens: u64) -> Result<(), RateLimitError> {
        let (mut entries, now) = self.current();
        let count = entries.len();
        let total: u64 = entries.iter().map(|(_, t)| t).sum();

        if count >= self.limits.rpm {
            warn!("RPM limit reached: {}/{}", count, self.limits.rpm);
            return Err(RateLimitError::RequestsExceeded {
                count,
                limit: self.limits.rpm,
            });
        }
        if total + tokens > self.limits.tpm {
            warn!("TPM limit reached: {}/{}", total + tokens, self.limits.tpm);
            return Err(RateLimitError::TokensExceeded {
                tokens: total + tokens,
                limit: self.limits.tpm,
            });
        }

        entries.push_back((now, tokens));
        debug!(
            "Request admitted: {}/{} requests, {}/{} tokens",
            count + 1,
            self.limits.rpm,
            total + tokens,
            self.limits.tpm
        );
        Ok(())
    }

    /// How long until a request of `tokens` would be admitted. Zero when it
    /// would be admitted now.
    pub fn wait_time(&self, tokens: u64) -> Duration {
        let (entries, now) = self.current();
        let window = self.limits.window;
        let until_expiry = |at: Instant| (at + window).saturating_duration_since(now);

        if entries.len() >= self.limits.rpm {
            return entries.front().map_or(Duration::ZERO, |(at, _)| until_expiry(*at));
        }

        let total: u64 = entries.iter().map(|(_, t)| t).sum();
        if total + tokens <= self.limits.tpm {
            return Duration::ZERO;
        }

        let to_free = total + tokens - self.limits.tpm;
        let mut freed = 0;
        for (at, t) in entries.iter() {
            freed += t;
            if freed >= to_free {
                return until_expiry(*at);
            }
        }
        // Freeing everything is still not enough: report when the oldest
        // entry leaves the window.
        entries.front().map_or(Duration::ZERO, |(at, _)| until_expiry(*at))
    }

    pub fn usage(&self) -> RateLimitUsage {
        let (entries, _) = self.current();
        let current_rpm = entries.len();
        let current_tpm: u64 = entries.iter().map(|(_, t)| t).sum();
        RateLimitUsage {
            current_rpm,
            current_tpm,
            remaining_rpm: self.limits.rpm.saturating_sub(current_rpm),
            remaining_tpm: self.limits.tpm.saturating_sub(current_tpm),
            rpm_limit: self.limits.rpm,
            tpm_limit: self.limits.tpm,
        }
    }

    /// Forget every recorded request.
    pub fn reset(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("Rate limiter reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Clock that only moves when told to.
    #[derive(Clone)]
    struct ManualClock {
        start: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.start + *self.offset.lock().unwrap()
        }
    }

    fn limiter(rpm: usize, tpm: u64) -> (TokenRateLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let limits = RateLimits {
            rpm,
            tpm,
            window: Duration::from_secs(60),
        };
        (TokenRateLimiter::with_clock(limits, clock.clone()), clock)
    }

    #[test]
    fn defaults() {
        let l = RateLimits::default();
        assert_eq!((l.rpm, l.tpm, l.window), (100, 10_000, Duration::from_secs(60)));
    }

    #[test]
    fn request_cap_refuses_then_recovers() {
        let (rl, clock) = limiter(3, 1_000);
        for _ in 0..3 {
            rl.try_acquire(10).unwrap();
        }
        assert_eq!(
            rl.try_acquire(10),
            Err(RateLimitError::RequestsExceeded { count: 3, limit: 3 })
        );
        assert_eq!(rl.wait_time(10), Duration::from_secs(60));

        clock.advance(Duration::from_secs(20));
        assert_eq!(rl.wait_time(10), Duration::from_secs(40));

        clock.advance(Duration::from_secs(41));
        assert!(rl.try_acquire(10).is_ok());
        assert_eq!(rl.usage().current_rpm, 1);
    }

    #[test]
    fn token_cap_counts_the_new_request() {
        let (rl, _) = limiter(100, 500);
        rl.try_acquire(300).unwrap();
        assert_eq!(
            rl.try_acquire(201),
            Err(RateLimitError::TokensExceeded {
                tokens: 501,
                limit: 500
            })
        );
        assert!(rl.try_acquire(200).is_ok());
    }

    #[test]
    fn wait_time_frees_oldest_tokens_first() {
        let (rl, clock) = limiter(100, 500);
        rl.try_acquire(200).unwrap();
        clock.advance(Duration::from_secs(10));
        rl.try_acquire(200).unwrap();
        clock.advance(Duration::from_secs(10));

        assert_eq!(rl.wait_time(100), Duration::ZERO);
        // Needs 200 freed: the first entry (t=0) expires at t=60.
        assert_eq!(rl.wait_time(300), Duration::from_secs(40));
        // Needs 300 freed: both entries, the second expires at t=70.
        assert_eq!(rl.wait_time(400), Duration::from_secs(50));
    }

    #[test]
    fn oversized_request_waits_for_oldest_entry() {
        let (rl, clock) = limiter(100, 500);
        rl.try_acquire(100).unwrap();
        clock.advance(Duration::from_secs(15));
        rl.try_acquire(100).unwrap();
        clock.advance(Duration::from_secs(5));

        // 600 tokens never fit in a 500 budget; the t=0 entry expires at t=60.
        assert_eq!(rl.wait_time(600), Duration::from_secs(40));

        rl.reset();
        assert_eq!(rl.wait_time(600), Duration::ZERO);
    }

    #[test]
    fn usage_and_reset() {
        let (rl, _) = limiter(10, 1_000);
        rl.try_acquire(100).unwrap();
        rl.try_acquire(50).unwrap();
        let u = rl.usage();
        assert_eq!(u.current_rpm, 2);
        assert_eq!(u.current_tpm, 150);
        assert_eq!(u.remaining_rpm, 8);
        assert_eq!(u.remaining_tpm, 850);

        rl.reset();
        assert_eq!(rl.usage().current_rpm, 0);
    }

    #[test]
    fn shared_across_threads() {
        let rl = Arc::new(TokenRateLimiter::new(RateLimits {
            rpm: 50,
            tpm: 1_000_000,
            window: Duration::from_secs(60),
        }));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || (0..10).filter(|_| rl.try_acquire(1).is_ok()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
