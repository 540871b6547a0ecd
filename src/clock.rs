//! Clock abstraction used by the circuit breaker and metrics registry.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Clock abstraction so time-based state can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds elapsed since an arbitrary but fixed epoch, monotonic.
    fn now_millis(&self) -> u64;

    /// Whole seconds since the Unix epoch, used to key sliding-window slots.
    fn unix_seconds(&self) -> u64;
}

/// Monotonic clock backed by `Instant::now()` plus wall-clock seconds from
/// `SystemTime`. The two are independent: `now_millis` is only ever used for
/// relative comparisons (cooldowns, idle durations), `unix_seconds` only for
/// slot keys.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn unix_seconds(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Fully controllable clock for deterministic tests.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        millis: Arc<AtomicU64>,
        seconds: Arc<AtomicU64>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self { millis: Arc::new(AtomicU64::new(0)), seconds: Arc::new(AtomicU64::new(0)) }
        }

        pub fn advance(&self, d: Duration) {
            self.millis.fetch_add(d.as_millis() as u64, Ordering::SeqCst);
            self.seconds.fetch_add(d.as_secs(), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.millis.load(Ordering::SeqCst)
        }

        fn unix_seconds(&self) -> u64 {
            self.seconds.load(Ordering::SeqCst)
        }
    }
}
