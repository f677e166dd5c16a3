#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::time::Duration;

use tracing::debug;

use crate::domain::{increase_ratio, BaselineSnapshot, UsageSample};
use crate::error::{SimError, SimResult};
use crate::sampler::Sampler;

impl BaselineSnapshot {
    /// Average `samples` CPU and memory readings, each CPU reading observing
    /// the host for `interval`.
    #[allow(clippy::cast_precision_loss)]
    pub fn collect(sampler: &dyn Sampler, samples: usize, interval: Duration) -> SimResult<Self> {
        if samples == 0 {
            return Err(SimError::InvalidInput("baseline needs at least one sample".into()));
        }
        let mut cpu_sum = 0.0;
        let mut memory_sum = 0.0;
        for _ in 0..samples {
            cpu_sum += sampler.cpu_percent(interval)?;
            memory_sum += sampler.memory_percent()?;
        }
        let snapshot = Self {
            cpu_percent: cpu_sum / samples as f64,
            memory_percent: memory_sum / samples as f64,
        };
        debug!(
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_percent,
            samples,
            "baseline collected"
        );
        Ok(snapshot)
    }
}

/// Latest readings plus the append-only sample history.
#[derive(Clone, Debug)]
pub struct Reporter {
    baseline: BaselineSnapshot,
    current_cpu: f64,
    current_memory: f64,
    history: Vec<UsageSample>,
}

impl Reporter {
    pub fn new(baseline: BaselineSnapshot) -> Self {
        Self {
            baseline,
            current_cpu: baseline.cpu_percent,
            current_memory: baseline.memory_percent,
            history: Vec::new(),
        }
    }

    /// Append a sample. Timestamps never go backwards even if the wall clock does.
    pub fn record(&mut self, cpu_percent: f64, memory_percent: f64, timestamp: f64) -> UsageSample {
        let timestamp = self
            .history
            .last()
            .map_or(timestamp, |prev| timestamp.max(prev.timestamp));
        let sample = UsageSample { timestamp, cpu_percent, memory_percent };
        self.current_cpu = cpu_percent;
        self.current_memory = memory_percent;
        self.history.push(sample);
        sample
    }

    pub fn baseline(&self) -> BaselineSnapshot {
        self.baseline
    }

    pub fn current(&self) -> (f64, f64) {
        (self.current_cpu, self.current_memory)
    }

    pub fn cpu_increase_ratio(&self) -> f64 {
        increase_ratio(self.current_cpu, self.baseline.cpu_percent)
    }

    pub fn memory_increase_ratio(&self) -> f64 {
        increase_ratio(self.current_memory, self.baseline.memory_percent)
    }

    pub fn history(&self) -> &[UsageSample] {
        &self.history
    }
}

/// Wall-clock seconds since the Unix epoch.
#[allow(clippy::cast_precision_loss)]
pub fn wall_clock_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
