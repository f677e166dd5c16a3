#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::{ProcessesToUpdate, System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::error::{SimError, SimResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl MemoryReading {
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Host resource queries. Implementations may block: a CPU reading with a
/// non-zero `interval` observes the host for that long.
pub trait Sampler: Send + Sync {
    /// System-wide CPU utilization in percent. A zero `interval` returns the
    /// utilization since the previous reading.
    fn cpu_percent(&self, interval: Duration) -> SimResult<f64>;
    fn memory(&self) -> SimResult<MemoryReading>;
    fn process_names(&self) -> SimResult<Vec<String>>;

    fn memory_percent(&self) -> SimResult<f64> {
        self.memory().map(|m| m.percent())
    }
}

struct HostState {
    system: System,
    last_cpu_refresh: Option<Instant>,
    /// Interval readings currently sleeping between their two refreshes.
    measuring: usize,
}

/// `sysinfo`-backed sampler for the running host.
pub struct SysinfoSampler {
    state: Mutex<HostState>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            state: Mutex::new(HostState {
                system,
                last_cpu_refresh: Some(Instant::now()),
                measuring: 0,
            }),
        }
    }

    /// True while an interval CPU reading is between its refreshes.
    pub fn is_measuring(&self) -> bool {
        self.state.lock().measuring > 0
    }

    pub fn last_cpu_refresh(&self) -> Option<Instant> {
        self.state.lock().last_cpu_refresh
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SysinfoSampler {
    fn cpu_percent(&self, interval: Duration) -> SimResult<f64> {
        if !interval.is_zero() {
            {
                let mut state = self.state.lock();
                state.system.refresh_cpu_usage();
                state.last_cpu_refresh = Some(Instant::now());
                state.measuring += 1;
            }
            // lock released while the host accumulates ticks
            std::thread::sleep(interval.max(MINIMUM_CPU_UPDATE_INTERVAL));
        }
        let mut state = self.state.lock();
        if interval.is_zero() {
            // an interval reading in flight owns the refresh cadence
            let due = state.measuring == 0
                && state
                    .last_cpu_refresh
                    .map_or(true, |at| at.elapsed() >= MINIMUM_CPU_UPDATE_INTERVAL);
            if due {
                state.system.refresh_cpu_usage();
                state.last_cpu_refresh = Some(Instant::now());
            }
        } else {
            state.system.refresh_cpu_usage();
            state.last_cpu_refresh = Some(Instant::now());
            state.measuring -= 1;
        }
        let usage = f64::from(state.system.global_cpu_usage());
        if !usage.is_finite() || state.system.cpus().is_empty() {
            return Err(SimError::ResourceQuery("cpu usage unavailable".into()));
        }
        Ok(usage.clamp(0.0, 100.0))
    }

    fn memory(&self) -> SimResult<MemoryReading> {
        let mut state = self.state.lock();
        state.system.refresh_memory();
        let total_bytes = state.system.total_memory();
        if total_bytes == 0 {
            return Err(SimError::ResourceQuery("total memory reported as 0".into()));
        }
        Ok(MemoryReading {
            total_bytes,
            used_bytes: state.system.used_memory().min(total_bytes),
        })
    }

    fn process_names(&self) -> SimResult<Vec<String>> {
        let mut state = self.state.lock();
        let _ = state.system.refresh_processes(ProcessesToUpdate::All, true);
        let mut names: Vec<String> = state
            .system
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[derive(Clone, Debug)]
struct StaticReadings {
    cpu_percent: f64,
    memory: MemoryReading,
    processes: Vec<String>,
    failure: Option<String>,
}

/// Fixed readings for tests and dry runs; never sleeps.
pub struct StaticSampler {
    readings: Mutex<StaticReadings>,
}

impl StaticSampler {
    pub fn new(cpu_percent: f64, total_bytes: u64, used_bytes: u64) -> Self {
        Self {
            readings: Mutex::new(StaticReadings {
                cpu_percent,
                memory: MemoryReading { total_bytes, used_bytes },
                processes: Vec::new(),
                failure: None,
            }),
        }
    }

    pub fn set_cpu(&self, cpu_percent: f64) {
        self.readings.lock().cpu_percent = cpu_percent;
    }

    pub fn set_memory(&self, total_bytes: u64, used_bytes: u64) {
        self.readings.lock().memory = MemoryReading { total_bytes, used_bytes };
    }

    pub fn set_processes(&self, names: Vec<String>) {
        self.readings.lock().processes = names;
    }

    /// Make every query fail with `reason` until cleared with `None`.
    pub fn set_failure(&self, reason: Option<String>) {
        self.readings.lock().failure = reason;
    }

    fn check(&self) -> SimResult<StaticReadings> {
        let readings = self.readings.lock().clone();
        match &readings.failure {
            Some(reason) => Err(SimError::ResourceQuery(reason.clone())),
            None => Ok(readings),
        }
    }
}

impl Sampler for StaticSampler {
    fn cpu_percent(&self, _interval: Duration) -> SimResult<f64> {
        self.check().map(|r| r.cpu_percent)
    }

    fn memory(&self) -> SimResult<MemoryReading> {
        self.check().map(|r| r.memory)
    }

    fn process_names(&self) -> SimResult<Vec<String>> {
        self.check().map(|r| r.processes)
    }
}
