//! Lock-free token-bucket rate limiter.
//!
//! The bucket state is a single virtual timestamp (`level`): the instant at
//! which the bucket was last conceptually empty. Available tokens are
//! `(now - level) / interval`, capped at the burst size by flooring `level`
//! at `now - burst`. Folding `(tokens, lastRefillTime)` into one word keeps
//! the compare-and-set a single `AtomicU64`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SPIN_THRESHOLD_NANOS: u64 = 1_000_000; // 1ms

/// Token-bucket rate limiter with nanosecond resolution.
pub struct RateLimiter {
    /// Nanoseconds accrued per token.
    interval_nanos: f64,
    /// Maximum accumulation, expressed in nanoseconds of refill time.
    burst_nanos: u64,
    start: Instant,
    level: AtomicU64,
}

impl RateLimiter {
    /// Rate limiter with the default 60-second burst capacity.
    pub fn new(permits_per_second: f64) -> Self {
        Self::with_burst(permits_per_second, 60.0)
    }

    /// Rate limiter with explicit burst capacity in seconds of accumulation.
    pub fn with_burst(permits_per_second: f64, max_burst_seconds: f64) -> Self {
        assert!(
            permits_per_second > 0.0 && max_burst_seconds > 0.0,
            "rate and burst must be positive"
        );
        Self {
            interval_nanos: 1e9 / permits_per_second,
            burst_nanos: (max_burst_seconds * 1e9) as u64,
            start: Instant::now(),
            // level == 0 with now == 0 means a full bucket
            level: AtomicU64::new(0),
        }
    }

    /// Acquire `permits` tokens, blocking until available.
    pub fn acquire(&self, permits: f64) {
        assert!(permits > 0.0, "permits must be positive");
        loop {
            match self.try_reserve(permits) {
                Ok(()) => return,
                Err(wait_nanos) => Self::wait(wait_nanos),
            }
        }
    }

    /// Acquire `permits` tokens if the required wait fits within `timeout`.
    pub fn try_acquire(&self, permits: f64, timeout: Duration) -> bool {
        assert!(permits > 0.0, "permits must be positive");
        let deadline = self.now_nanos() + timeout.as_nanos() as u64;
        loop {
            match self.try_reserve(permits) {
                Ok(()) => return true,
                Err(wait_nanos) => {
                    if self.now_nanos() + wait_nanos > deadline {
                        return false;
                    }
                    Self::wait(wait_nanos);
                }
            }
        }
    }

    /// One CAS attempt: consume tokens if available, otherwise report the
    /// wait in nanoseconds without mutating state.
    fn try_reserve(&self, permits: f64) -> Result<(), u64> {
        let cost = (permits * self.interval_nanos) as u64;
        loop {
            let now = self.now_nanos();
            let level = self.level.load(Ordering::Acquire);
            // Cap accumulation at the burst size.
            let effective = level.max(now.saturating_sub(self.burst_nanos));

            if effective + cost > now {
                return Err(effective + cost - now);
            }

            if self
                .level
                .compare_exchange(level, effective + cost, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
            std::hint::spin_loop();
        }
    }

    fn now_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    /// Spin for sub-millisecond waits, sleep otherwise.
    fn wait(wait_nanos: u64) {
        if wait_nanos > SPIN_THRESHOLD_NANOS {
            std::thread::sleep(Duration::from_nanos(wait_nanos));
        } else {
            let deadline = Instant::now() + Duration::from_nanos(wait_nanos);
            while Instant::now() < deadline {
                std::hint::spin_loop();
            }
        }
    }
}
