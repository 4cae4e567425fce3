use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds as a float, abstracted so cache/token-bucket tests can
/// drive time deterministically instead of sleeping real seconds. The token
/// bucket needs sub-second precision (fractional refill waits); the cache
/// truncates to whole seconds for freshness comparisons.
pub trait Clock: Send + Sync {
    fn now_secs_f64(&self) -> f64;

    fn now_secs(&self) -> u64 {
        self.now_secs_f64() as u64
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs_f64(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs_f64()
    }
}

/// A clock whose value is set explicitly by a test. Stored as fixed-point
/// millis in an atomic so it can be shared into a component under a shared
/// reference without interior floating-point atomics (which std lacks).
#[derive(Debug)]
pub struct FakeClock {
    millis: AtomicU64,
}

impl FakeClock {
    pub fn new(start_secs: f64) -> Self {
        Self {
            millis: AtomicU64::new((start_secs * 1000.0) as u64),
        }
    }

    pub fn set(&self, value_secs: f64) {
        self.millis.store((value_secs * 1000.0) as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_secs: f64) {
        self.millis
            .fetch_add((delta_secs * 1000.0) as u64, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_secs_f64(&self) -> f64 {
        self.millis.load(Ordering::SeqCst) as f64 / 1000.0
    }
}
