#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SimConfig;
use crate::domain::{
    BaselineSnapshot, CriticalUsage, ResourceReport, RunState, TargetState, UsageSample,
};
use crate::error::{SimError, SimResult};
use crate::lib_cpu::{PdThrottle, ThrottleLoop, ThrottleStats};
use crate::lib_mem::{inflate, MemoryHold};
use crate::metrics::Metrics;
use crate::reporter::{wall_clock_seconds, Reporter};
use crate::safety::SafetyTrip;
use crate::sampler::Sampler;
use crate::validation::validate_config;

const TRIP_CHANNEL_CAPACITY: usize = 16;

pub struct ControllerBuilder {
    sampler: Arc<dyn Sampler>,
    clock: Arc<dyn Clock>,
    config: SimConfig,
    metrics: Option<Metrics>,
}

impl ControllerBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the config and collect the baseline on the blocking pool.
    pub async fn build(self) -> SimResult<Controller> {
        validate_config(&self.config)?;
        let metrics = match self.metrics {
            Some(m) => m,
            None => Metrics::new().map_err(|e| SimError::Metrics(format!("{e:#}")))?,
        };
        let sampler = Arc::clone(&self.sampler);
        let samples = self.config.baseline_samples;
        let interval = self.config.sample_interval();
        let baseline = tokio::task::spawn_blocking(move || {
            BaselineSnapshot::collect(sampler.as_ref(), samples, interval)
        })
        .await
        .map_err(|e| SimError::Task(format!("baseline: {e}")))??;
        info!(cpu = baseline.cpu_percent, memory = baseline.memory_percent, "baseline ready");
        let (trips, _) = broadcast::channel(TRIP_CHANNEL_CAPACITY);
        let stats = Arc::new(ThrottleStats::new(baseline.cpu_percent));
        Ok(Controller {
            inner: Arc::new(Inner {
                sampler: self.sampler,
                clock: self.clock,
                config: self.config,
                metrics,
                runtime: Handle::current(),
                baseline,
                reporter: Mutex::new(Reporter::new(baseline)),
                hold: Arc::new(Mutex::new(MemoryHold::new())),
                failure: Arc::new(Mutex::new(None)),
                trips,
                lifecycle: Mutex::new(Lifecycle {
                    state: RunState::Idle,
                    running: None,
                    target: None,
                    stats,
                    tripped: Arc::new(AtomicBool::new(false)),
                    tasks: Vec::new(),
                }),
            }),
        })
    }
}

struct Lifecycle {
    state: RunState,
    running: Option<Arc<AtomicBool>>,
    target: Option<TargetState>,
    stats: Arc<ThrottleStats>,
    /// Trip flag of the current or last run.
    tripped: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    sampler: Arc<dyn Sampler>,
    clock: Arc<dyn Clock>,
    config: SimConfig,
    metrics: Metrics,
    runtime: Handle,
    baseline: BaselineSnapshot,
    reporter: Mutex<Reporter>,
    hold: Arc<Mutex<MemoryHold>>,
    failure: Arc<Mutex<Option<SimError>>>,
    trips: broadcast::Sender<CriticalUsage>,
    lifecycle: Mutex<Lifecycle>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(running) = &self.lifecycle.get_mut().running {
            running.store(false, Ordering::Release);
        }
    }
}

/// Drives one simulated tariff load at a time. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn builder(sampler: Arc<dyn Sampler>) -> ControllerBuilder {
        ControllerBuilder {
            sampler,
            clock: Arc::new(SystemClock::new()),
            config: SimConfig::default(),
            metrics: None,
        }
    }

    pub fn baseline(&self) -> BaselineSnapshot {
        self.inner.baseline
    }

    pub fn config(&self) -> &SimConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn state(&self) -> RunState {
        self.inner.lifecycle.lock().state
    }

    /// Background tasks launched and not yet finished.
    pub fn active_tasks(&self) -> usize {
        self.inner
            .lifecycle
            .lock()
            .tasks
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }

    /// Launch the throttle loop and the memory inflator for `tariff_rate`.
    /// Rejected while a run is active.
    pub fn start(&self, tariff_rate: f64) -> SimResult<TargetState> {
        let inner = &self.inner;
        let target = TargetState::derive(&inner.baseline, tariff_rate)?;
        let mut lc = inner.lifecycle.lock();
        if lc.state == RunState::Running {
            warn!(rate = tariff_rate, "start rejected, simulation already running");
            return Err(SimError::AlreadyRunning);
        }
        lc.tasks.retain(|t| !t.is_finished());

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(ThrottleStats::new(inner.baseline.cpu_percent));
        let tripped = Arc::new(AtomicBool::new(false));
        *inner.failure.lock() = None;

        let inflator = self.spawn_inflator(target, Arc::clone(&running));
        let safety = SafetyTrip::new(
            Arc::clone(&inner.sampler),
            inner.config.critical_percent,
            Arc::clone(&tripped),
            inner.trips.clone(),
            inner.metrics.clone(),
        );
        let throttle = ThrottleLoop::new(
            PdThrottle::new(&inner.config, target.target_cpu, inner.baseline.cpu_percent),
            Arc::clone(&inner.clock),
            Arc::clone(&running),
            safety,
            Arc::clone(&stats),
            inner.metrics.clone(),
        );
        let throttle = inner.runtime.spawn_blocking(move || throttle.run());

        lc.tasks.push(inflator);
        lc.tasks.push(throttle);
        lc.running = Some(running);
        lc.stats = stats;
        lc.tripped = tripped;
        lc.target = Some(target);
        lc.state = RunState::Running;

        inner.metrics.running.set(1);
        inner.metrics.target_cpu_percent.set(target.target_cpu);
        inner.metrics.target_memory_percent.set(target.target_memory);
        info!(
            rate = target.tariff_rate,
            target_cpu = target.target_cpu,
            target_memory = target.target_memory,
            "simulation started"
        );
        Ok(target)
    }

    fn spawn_inflator(&self, target: TargetState, running: Arc<AtomicBool>) -> JoinHandle<()> {
        let sampler = Arc::clone(&self.inner.sampler);
        let hold = Arc::clone(&self.inner.hold);
        let failure = Arc::clone(&self.inner.failure);
        let metrics = self.inner.metrics.clone();
        let chunk_bytes = self.inner.config.chunk_bytes;
        self.inner.runtime.spawn_blocking(move || {
            let blocks = sampler
                .memory()
                .and_then(|reading| inflate(reading, target.target_memory, chunk_bytes));
            match blocks {
                Ok(blocks) => {
                    let mut hold = hold.lock();
                    // a stop that raced the allocation wins; the blocks drop here
                    if running.load(Ordering::Acquire) {
                        hold.fill(blocks);
                        let held = i64::try_from(hold.len()).unwrap_or(i64::MAX);
                        metrics.memory_blocks_held.set(held);
                    }
                }
                Err(e) => {
                    let mut failure = failure.lock();
                    // a stopped run must not report into the next one
                    if running.load(Ordering::Acquire) {
                        warn!(error=%e, "memory inflator failed");
                        *failure = Some(e);
                    } else {
                        debug!(error=%e, "memory inflator failed after stop, discarded");
                    }
                }
            }
        })
    }

    /// Clear the run flag and release held memory. Does not wait for the
    /// throttle loop to notice; see [`Controller::shutdown`]. No-op unless running.
    pub fn stop(&self) {
        let inner = &self.inner;
        let mut lc = inner.lifecycle.lock();
        if lc.state != RunState::Running {
            return;
        }
        if let Some(running) = lc.running.take() {
            running.store(false, Ordering::Release);
        }
        let released = {
            let mut hold = inner.hold.lock();
            let released = hold.len();
            hold.clear();
            released
        };
        lc.state = RunState::Stopped;
        inner.metrics.running.set(0);
        inner.metrics.memory_blocks_held.set(0);
        info!(released_blocks = released, "simulation stopped");
    }

    /// Stop, then wait for every background task to finish.
    pub async fn shutdown(&self) -> SimResult<()> {
        self.stop();
        let tasks = std::mem::take(&mut self.inner.lifecycle.lock().tasks);
        for task in tasks {
            task.await.map_err(|e| SimError::Task(e.to_string()))?;
        }
        Ok(())
    }

    /// Take one fresh CPU/memory reading and append it to the history.
    pub async fn sample(&self) -> SimResult<(f64, f64)> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || -> SimResult<(f64, f64)> {
            let cpu = inner.sampler.cpu_percent(inner.config.sample_interval())?;
            let memory = inner.sampler.memory_percent()?;
            inner.reporter.lock().record(cpu, memory, wall_clock_seconds());
            inner.metrics.samples_total.inc();
            Ok((cpu, memory))
        })
        .await
        .map_err(|e| SimError::Task(format!("sample: {e}")))?
    }

    pub fn report(&self) -> ResourceReport {
        let inner = &self.inner;
        let (current_cpu, current_memory, cpu_increase_ratio, memory_increase_ratio) = {
            let reporter = inner.reporter.lock();
            let (cpu, memory) = reporter.current();
            (cpu, memory, reporter.cpu_increase_ratio(), reporter.memory_increase_ratio())
        };
        let (state, target, throttle_average, throttle_ticks, tripped) = {
            let lc = inner.lifecycle.lock();
            let tripped = lc.tripped.load(Ordering::Acquire);
            (lc.state, lc.target, lc.stats.average(), lc.stats.ticks(), tripped)
        };
        ResourceReport {
            baseline_cpu: inner.baseline.cpu_percent,
            baseline_memory: inner.baseline.memory_percent,
            current_cpu,
            current_memory,
            cpu_increase_ratio,
            memory_increase_ratio,
            state,
            target,
            throttle_average,
            throttle_ticks,
            memory_blocks_held: inner.hold.lock().len(),
            tripped,
            background_failure: inner.failure.lock().as_ref().map(ToString::to_string),
        }
    }

    pub fn history(&self) -> Vec<UsageSample> {
        self.inner.reporter.lock().history().to_vec()
    }

    pub fn subscribe_trips(&self) -> broadcast::Receiver<CriticalUsage> {
        self.inner.trips.subscribe()
    }

    /// Resume the throttle after a safety trip. Returns false if nothing was pending.
    pub fn acknowledge_trip(&self) -> bool {
        let was = self.inner.lifecycle.lock().tripped.swap(false, Ordering::AcqRel);
        if was {
            info!("safety trip acknowledged");
        }
        was
    }

    pub async fn process_names(&self) -> SimResult<Vec<String>> {
        let sampler = Arc::clone(&self.inner.sampler);
        tokio::task::spawn_blocking(move || sampler.process_names())
            .await
            .map_err(|e| SimError::Task(format!("process list: {e}")))?
    }
}
