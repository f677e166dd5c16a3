#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::CriticalUsage;
use crate::metrics::Metrics;
use crate::sampler::Sampler;

/// Usage guard run on every throttle tick. Once tripped it stays tripped until
/// acknowledged; the event is emitted once per trip.
#[derive(Clone)]
pub struct SafetyTrip {
    sampler: Arc<dyn Sampler>,
    threshold: f64,
    tripped: Arc<AtomicBool>,
    events: broadcast::Sender<CriticalUsage>,
    metrics: Metrics,
}

impl SafetyTrip {
    pub fn new(
        sampler: Arc<dyn Sampler>,
        threshold: f64,
        tripped: Arc<AtomicBool>,
        events: broadcast::Sender<CriticalUsage>,
        metrics: Metrics,
    ) -> Self {
        Self { sampler, threshold, tripped, events, metrics }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Sample the host and trip if CPU or memory is at or above the threshold.
    /// Returns the event when this call caused the trip.
    pub fn check(&self) -> Option<CriticalUsage> {
        if self.is_tripped() {
            return None;
        }
        let readings = self
            .sampler
            .cpu_percent(Duration::ZERO)
            .and_then(|cpu| self.sampler.memory_percent().map(|mem| (cpu, mem)));
        let (cpu_percent, memory_percent) = match readings {
            Ok(r) => r,
            Err(e) => {
                debug!(error=%e, "safety check skipped");
                return None;
            }
        };
        if cpu_percent < self.threshold && memory_percent < self.threshold {
            return None;
        }
        if self.tripped.swap(true, Ordering::AcqRel) {
            return None;
        }
        let event = CriticalUsage { cpu_percent, memory_percent, threshold: self.threshold };
        warn!(
            cpu = cpu_percent,
            memory = memory_percent,
            threshold = self.threshold,
            "critical usage, load paused until acknowledged"
        );
        self.metrics.safety_trips_total.inc();
        // no subscribers is fine, the tripped flag is still visible in reports
        let _ = self.events.send(event);
        Some(event)
    }

    pub fn acknowledge(&self) -> bool {
        self.tripped.swap(false, Ordering::AcqRel)
    }
}
