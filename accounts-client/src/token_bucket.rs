use std::sync::{Arc, Mutex};

use accounts_core::clock::{Clock, SystemClock};
use accounts_core::AccountsError;

struct Inner {
    level: f64,
    last_fill_time: f64,
}

/// A continuous-refill token bucket: `capacity` burst tokens, refilled at
/// `1 / period_seconds` tokens per second. Each bucket owns a mutex guarding
/// its own counters. Refill is continuous rather than a fixed window: tokens
/// trickle back in proportionally to elapsed time instead of resetting in
/// one jump at period boundaries.
pub struct TokenBucket {
    capacity: f64,
    rate_per_second: f64,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    pub fn new(capacity: u32, period_seconds: f64) -> Self {
        Self::with_clock(capacity, period_seconds, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: u32, period_seconds: f64, clock: Arc<dyn Clock>) -> Self {
        assert!(capacity >= 1, "token bucket capacity must be >= 1");
        assert!(period_seconds > 0.0, "token bucket period must be > 0");
        let capacity = capacity as f64;
        Self {
            capacity,
            rate_per_second: 1.0 / period_seconds,
            inner: Mutex::new(Inner {
                level: capacity,
                last_fill_time: clock.now_secs_f64(),
            }),
            clock,
        }
    }

    /// The `linuxAccountViews` bucket: capacity 3, 300s/token.
    pub fn linux_account_views() -> Self {
        Self::new(3, 300.0)
    }

    /// The `authorizedKeysView` bucket: capacity 10, 60s/token.
    pub fn authorized_keys_view() -> Self {
        Self::new(10, 60.0)
    }

    pub fn consume(&self) -> Result<(), AccountsError> {
        let now = self.clock.now_secs_f64();
        let mut inner = self.inner.lock().expect("token bucket mutex poisoned");

        let delta = now - inner.last_fill_time;
        if delta > 0.0 {
            inner.level = (inner.level + delta * self.rate_per_second).min(self.capacity);
        }
        // Unconditionally advance the fill clock, even on a backward jump —
        // this discards the skew rather than granting extra tokens on the
        // next forward-moving call.
        inner.last_fill_time = now;

        if inner.level < 1.0 {
            let wait_seconds = (1.0 - inner.level) / self.rate_per_second;
            return Err(AccountsError::OutOfQuota { wait_seconds });
        }

        inner.level -= 1.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accounts_core::FakeClock;

    fn bucket(capacity: u32, period: f64, start: f64) -> (TokenBucket, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(start));
        (
            TokenBucket::with_clock(capacity, period, clock.clone() as Arc<dyn Clock>),
            clock,
        )
    }

    // === continuous refill walkthrough: capacity 2, period 3s ===

    #[test]
    fn test_scenario_capacity_2_period_3() {
        let (bucket, clock) = bucket(2, 3.0, 0.0);

        // t=0: two consumes succeed, third fails with wait 3.0
        assert!(bucket.consume().is_ok());
        assert!(bucket.consume().is_ok());
        match bucket.consume() {
            Err(AccountsError::OutOfQuota { wait_seconds }) => {
                assert!((wait_seconds - 3.0).abs() < 1e-9, "{wait_seconds}");
            }
            other => panic!("expected OutOfQuota, got {other:?}"),
        }

        // t=3: one succeeds
        clock.set(3.0);
        assert!(bucket.consume().is_ok());

        // t=5.9: fails with wait 0.1
        clock.set(5.9);
        match bucket.consume() {
            Err(AccountsError::OutOfQuota { wait_seconds }) => {
                assert!((wait_seconds - 0.1).abs() < 1e-6, "{wait_seconds}");
            }
            other => panic!("expected OutOfQuota, got {other:?}"),
        }

        // t=6: succeeds
        clock.set(6.0);
        assert!(bucket.consume().is_ok());
    }

    #[test]
    fn test_backward_clock_grants_no_extra_tokens() {
        let (bucket, clock) = bucket(2, 3.0, 10.0);
        assert!(bucket.consume().is_ok());
        assert!(bucket.consume().is_ok());
        assert!(bucket.consume().is_err());

        // clock jumps backward
        clock.set(0.0);
        assert!(
            bucket.consume().is_err(),
            "a backward clock jump must not refill the bucket"
        );

        // last_fill_time is unconditionally pinned at 0.0 (the backward
        // reading) even though consume() failed. Moving forward to 10.0
        // refills from that pinned point, not from the earlier t=10
        // exhaustion.
        clock.set(10.0);
        assert!(bucket.consume().is_ok());
    }

    // === invariant 4: bounded consumption ===

    #[test]
    fn test_bounded_consumption_over_window() {
        let (bucket, clock) = bucket(3, 1.0, 0.0);
        let mut successes = 0;
        for t in 0..10 {
            clock.set(t as f64);
            if bucket.consume().is_ok() {
                successes += 1;
            }
        }
        let bound = 3 + (9 / 1); // capacity + floor((T_last - T_first) / period)
        assert!(successes <= bound);
    }

    #[test]
    fn test_named_bucket_constructors_match_spec_parameters() {
        let linux = TokenBucket::linux_account_views();
        assert_eq!(linux.capacity as u32, 3);
        assert!((linux.rate_per_second - 1.0 / 300.0).abs() < 1e-12);

        let keys = TokenBucket::authorized_keys_view();
        assert_eq!(keys.capacity as u32, 10);
        assert!((keys.rate_per_second - 1.0 / 60.0).abs() < 1e-12);
    }
}
