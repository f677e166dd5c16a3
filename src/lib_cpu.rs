#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{GainUnits, SimConfig};
use crate::domain::CriticalUsage;
use crate::metrics::Metrics;
use crate::safety::SafetyTrip;

/// Proportional-derivative duty-cycle controller over a fixed window.
///
/// With [`GainUnits::Percent`] the adjustment is percentage points of the
/// window; with [`GainUnits::Seconds`] it is added to the work time as is.
#[derive(Clone, Debug)]
pub struct PdThrottle {
    window: Duration,
    target_cpu: f64,
    kp: f64,
    kd: f64,
    gain_units: GainUnits,
    smoothing: f64,
    average: f64,
    prev_error: f64,
}

impl PdThrottle {
    pub fn new(cfg: &SimConfig, target_cpu: f64, initial_average: f64) -> Self {
        Self {
            window: cfg.window(),
            target_cpu,
            kp: cfg.kp,
            kd: cfg.kd,
            gain_units: cfg.gain_units,
            smoothing: cfg.smoothing,
            average: initial_average,
            prev_error: 0.0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn target_cpu(&self) -> f64 {
        self.target_cpu
    }

    /// Smoothed CPU percent fed back into the controller.
    pub fn average(&self) -> f64 {
        self.average
    }

    /// Busy time for the next window, in `[0, window]`.
    pub fn work_time(&mut self) -> Duration {
        let error = self.target_cpu - self.average;
        let delta = error - self.prev_error;
        self.prev_error = error;
        let adjustment = self.kp * error + self.kd * delta;
        let window = self.window.as_secs_f64();
        let target_work = window * self.target_cpu / 100.0;
        let work = match self.gain_units {
            GainUnits::Percent => target_work + window * adjustment / 100.0,
            GainUnits::Seconds => target_work + adjustment,
        };
        if !work.is_finite() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(work.clamp(0.0, window))
    }

    /// Fold the measured busy time of one window into the average and return
    /// that window's CPU percent.
    pub fn observe(&mut self, elapsed: Duration) -> f64 {
        let actual_cpu = elapsed.as_secs_f64() / self.window.as_secs_f64() * 100.0;
        self.average = self.smoothing * self.average + (1.0 - self.smoothing) * actual_cpu;
        actual_cpu
    }
}

/// Progress shared between a running loop and the controller.
#[derive(Debug, Default)]
pub struct ThrottleStats {
    average_bits: AtomicU64,
    ticks: AtomicU64,
}

impl ThrottleStats {
    pub fn new(initial_average: f64) -> Self {
        Self {
            average_bits: AtomicU64::new(initial_average.to_bits()),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn average(&self) -> f64 {
        f64::from_bits(self.average_bits.load(Ordering::Acquire))
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    fn record(&self, average: f64) {
        self.average_bits.store(average.to_bits(), Ordering::Release);
        self.ticks.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickOutcome {
    Worked {
        work: Duration,
        actual_cpu: f64,
        trip: Option<CriticalUsage>,
    },
    /// Safety trip pending acknowledgment; the window was slept through.
    Paused,
}

pub struct ThrottleLoop {
    throttle: PdThrottle,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
    safety: SafetyTrip,
    stats: Arc<ThrottleStats>,
    metrics: Metrics,
}

impl ThrottleLoop {
    pub fn new(
        throttle: PdThrottle,
        clock: Arc<dyn Clock>,
        running: Arc<AtomicBool>,
        safety: SafetyTrip,
        stats: Arc<ThrottleStats>,
        metrics: Metrics,
    ) -> Self {
        Self { throttle, clock, running, safety, stats, metrics }
    }

    pub fn throttle(&self) -> &PdThrottle {
        &self.throttle
    }

    pub fn tick(&mut self) -> TickOutcome {
        let window = self.throttle.window();
        let start = self.clock.now();
        if self.safety.is_tripped() {
            self.clock.sleep(window);
            return TickOutcome::Paused;
        }
        let work = self.throttle.work_time();
        self.clock.spin(work);
        let elapsed = self.clock.now().saturating_sub(start);
        let actual_cpu = self.throttle.observe(elapsed);
        let remaining = window.saturating_sub(self.clock.now().saturating_sub(start));
        if !remaining.is_zero() {
            self.clock.sleep(remaining);
        }
        let trip = self.safety.check();
        let average = self.throttle.average();
        self.stats.record(average);
        self.metrics.throttle_average_percent.set(average);
        self.metrics.throttle_ticks_total.inc();
        TickOutcome::Worked { work, actual_cpu, trip }
    }

    /// Tick until the run flag is cleared. The current window always completes.
    pub fn run(mut self) {
        info!(
            target_cpu = self.throttle.target_cpu(),
            window_ms = self.throttle.window().as_millis(),
            "throttle loop started"
        );
        while self.running.load(Ordering::Acquire) {
            if let TickOutcome::Worked { trip: Some(event), .. } = self.tick() {
                debug!(
                    cpu = event.cpu_percent,
                    memory = event.memory_percent,
                    "throttle paused by safety trip"
                );
            }
        }
        info!(
            average = self.throttle.average(),
            ticks = self.stats.ticks(),
            "throttle loop stopped"
        );
    }
}
