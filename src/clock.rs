#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! Time source for the throttle loop. `spin` must burn real CPU on the system
//! clock; the manual clock only moves virtual time forward.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Duration;
    /// Busy-wait for `dur` without yielding.
    fn spin(&self, dur: Duration);
    fn sleep(&self, dur: Duration);
}

#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn spin(&self, dur: Duration) {
        let spin_until = Instant::now() + dur;
        while Instant::now() < spin_until {
            std::hint::spin_loop();
        }
    }

    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

/// Virtual clock: `spin` and `sleep` advance time instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, dur: Duration) {
        let step = u64::try_from(dur.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(step, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn spin(&self, dur: Duration) {
        self.advance(dur);
    }

    fn sleep(&self, dur: Duration) {
        self.advance(dur);
        // let the test thread observe progress
        std::thread::yield_now();
    }
}
