// Time source and blocking-delay seam. The control loop is strictly
// polling-based, so sleeps are real blocking sleeps on hardware; tests
// substitute virtual time.

use std::thread;
use std::time::{Duration, Instant};

pub trait Clock {
    /// Milliseconds since boot (monotonic).
    fn now_ms(&self) -> u64;

    /// Block the control loop for `ms` milliseconds.
    fn sleep_ms(&mut self, ms: u64);
}

/// Wall-clock implementation backed by `std::time`.
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn sleep_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

#[cfg(test)]
pub mod testing {
    use super::Clock;

    /// Virtual clock for tests: `sleep_ms` advances time instantly and
    /// records each requested delay.
    #[derive(Debug, Default)]
    pub struct FakeClock {
        pub now: u64,
        pub sleeps: Vec<u64>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn advance(&mut self, ms: u64) {
            self.now += ms;
        }
    }

    impl Clock for FakeClock {
        fn now_ms(&self) -> u64 {
            self.now
        }

        fn sleep_ms(&mut self, ms: u64) {
            self.sleeps.push(ms);
            self.now += ms;
        }
    }
}
