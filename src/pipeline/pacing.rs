use std::time::{Duration, Instant};

/// Time source for the limiter; swapped for a manual clock in tests.
pub trait Clock {
    /// Monotonic time since the clock was created.
    fn elapsed(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Token bucket pacing document writes.
///
/// Starts full. A request larger than the current balance drives it
/// negative and blocks until the debt has been refilled, so a request
/// bigger than `capacity` still completes.
#[derive(Debug)]
pub struct TokenBucket<C: Clock> {
    clock: C,
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Duration,
    waited: Duration,
}

impl<C: Clock> TokenBucket<C> {
    pub fn new(clock: C, capacity: u64, refill_per_sec: u64) -> Self {
        let last_refill = clock.elapsed();
        Self {
            clock,
            capacity: capacity.max(1) as f64,
            refill_per_sec: refill_per_sec.max(1) as f64,
            tokens: capacity.max(1) as f64,
            last_refill,
            waited: Duration::ZERO,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn refill(&mut self) {
        let now = self.clock.elapsed();
        let delta = now.saturating_sub(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + delta * self.refill_per_sec).min(self.capacity);
    }

    /// Take `permits` tokens, sleeping if the bucket is short. Returns the wait.
    pub fn acquire(&mut self, permits: u64) -> Duration {
        self.refill();
        self.tokens -= permits as f64;
        if self.tokens >= 0.0 {
            return Duration::ZERO;
        }
        let wait = Duration::from_secs_f64(-self.tokens / self.refill_per_sec);
        tracing::debug!(permits, wait_ms = wait.as_millis() as u64, "throttling writes");
        self.clock.sleep(wait);
        self.refill();
        self.waited += wait;
        wait
    }

    /// Total time spent sleeping in `acquire`.
    pub fn total_wait(&self) -> Duration {
        self.waited
    }

    #[cfg(test)]
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}

#[cfg(test)]
pub mod testing {
    use super::Clock;
    use std::cell::Cell;
    use std::time::Duration;

    /// Clock that only moves when slept on or advanced by hand.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        now: Cell<Duration>,
        slept: Cell<Duration>,
    }

    impl ManualClock {
        pub fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }

        pub fn slept(&self) -> Duration {
            self.slept.get()
        }
    }

    impl Clock for ManualClock {
        fn elapsed(&self) -> Duration {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.advance(duration);
            self.slept.set(self.slept.get() + duration);
        }
    }
}
