#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tariff_load_sim::{
    Controller, ManualClock, MemoryReading, RunState, Sampler, SimConfig, SimError, SimResult,
    StaticSampler,
};

const MIB: u64 = 1024 * 1024;

async fn controller(sampler: &Arc<StaticSampler>) -> Controller {
    Controller::builder(sampler.clone())
        .clock(Arc::new(ManualClock::new()))
        .build()
        .await
        .expect("build")
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn converges_and_inflates() {
    let sampler = Arc::new(StaticSampler::new(10.0, 100 * MIB, 20 * MIB));
    let ctrl = controller(&sampler).await;
    let base = ctrl.baseline();
    assert!((base.cpu_percent - 10.0).abs() < 1e-9);
    assert!((base.memory_percent - 20.0).abs() < 1e-9);

    let target = ctrl.start(100.0).expect("start");
    assert!((target.target_cpu - 20.0).abs() < 1e-9);
    assert!((target.target_memory - 40.0).abs() < 1e-9);
    assert_eq!(ctrl.state(), RunState::Running);

    assert!(wait_until(|| ctrl.report().throttle_ticks >= 300).await, "throttle did not tick");
    assert!(wait_until(|| ctrl.report().memory_blocks_held == 20).await, "inflator did not finish");
    let report = ctrl.report();
    assert!((report.throttle_average - 20.0).abs() < 2.0, "average {}", report.throttle_average);
    assert!(report.background_failure.is_none());

    ctrl.shutdown().await.expect("shutdown");
    assert_eq!(ctrl.state(), RunState::Stopped);
    assert_eq!(ctrl.report().memory_blocks_held, 0);
    assert_eq!(ctrl.active_tasks(), 0);
}

#[tokio::test]
async fn invalid_rate_launches_nothing() {
    let sampler = Arc::new(StaticSampler::new(10.0, 100 * MIB, 20 * MIB));
    let ctrl = controller(&sampler).await;
    for rate in [0.0, -5.0] {
        assert!(matches!(ctrl.start(rate), Err(SimError::InvalidInput(_))));
    }
    assert_eq!(ctrl.active_tasks(), 0);
    assert_eq!(ctrl.state(), RunState::Idle);
    assert!(ctrl.report().target.is_none());
}

#[tokio::test]
async fn second_start_rejected_then_restart_allowed() {
    let sampler = Arc::new(StaticSampler::new(10.0, 100 * MIB, 20 * MIB));
    let ctrl = controller(&sampler).await;
    ctrl.start(50.0).expect("start");
    assert_eq!(ctrl.start(50.0), Err(SimError::AlreadyRunning));
    ctrl.stop();
    assert_eq!(ctrl.state(), RunState::Stopped);
    let target = ctrl.start(10.0).expect("restart");
    assert!((target.target_cpu - 11.0).abs() < 1e-9);
    ctrl.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn stop_when_idle_is_noop() {
    let sampler = Arc::new(StaticSampler::new(10.0, 100 * MIB, 20 * MIB));
    let ctrl = controller(&sampler).await;
    ctrl.stop();
    assert_eq!(ctrl.state(), RunState::Idle);
    ctrl.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn samples_append_and_report_freezes_after_stop() {
    let sampler = Arc::new(StaticSampler::new(10.0, 100 * MIB, 20 * MIB));
    let ctrl = controller(&sampler).await;
    ctrl.start(100.0).expect("start");
    sampler.set_cpu(30.0);
    assert_eq!(ctrl.sample().await.expect("sample"), (30.0, 20.0));
    assert_eq!(ctrl.history().len(), 1);
    assert_eq!(ctrl.sample().await.expect("sample").0, 30.0);
    let history = ctrl.history();
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp <= history[1].timestamp);

    ctrl.stop();
    sampler.set_cpu(70.0);
    let report = ctrl.report();
    assert!((report.current_cpu - 30.0).abs() < 1e-9);
    assert!((report.cpu_increase_ratio - 2.0).abs() < 1e-9);
    assert_eq!(report.memory_blocks_held, 0);
    ctrl.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn zero_baseline_reports_zero_ratio() {
    let sampler = Arc::new(StaticSampler::new(0.0, 100 * MIB, 20 * MIB));
    let ctrl = controller(&sampler).await;
    sampler.set_cpu(55.0);
    ctrl.sample().await.expect("sample");
    let report = ctrl.report();
    assert!(report.baseline_cpu.abs() < f64::EPSILON);
    assert!(report.cpu_increase_ratio.abs() < f64::EPSILON);
}

#[tokio::test]
async fn sampler_failure_surfaces() {
    let sampler = Arc::new(StaticSampler::new(10.0, 100 * MIB, 20 * MIB));
    sampler.set_failure(Some("no host".into()));
    let err = Controller::builder(sampler.clone()).build().await.err();
    assert!(matches!(err, Some(SimError::ResourceQuery(_))));

    sampler.set_failure(None);
    let ctrl = controller(&sampler).await;
    sampler.set_failure(Some("no host".into()));
    assert!(matches!(ctrl.sample().await, Err(SimError::ResourceQuery(_))));
    assert!(ctrl.history().is_empty());

    ctrl.start(100.0).expect("start");
    assert!(wait_until(|| ctrl.report().background_failure.is_some()).await);
    ctrl.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn safety_trip_is_reported_and_acknowledged() {
    let sampler = Arc::new(StaticSampler::new(10.0, 100 * MIB, 20 * MIB));
    let ctrl = controller(&sampler).await;
    let mut trips = ctrl.subscribe_trips();
    sampler.set_cpu(99.5);
    ctrl.start(100.0).expect("start");
    let event = tokio::time::timeout(Duration::from_secs(5), trips.recv())
        .await
        .expect("trip in time")
        .expect("event");
    assert!((event.cpu_percent - 99.5).abs() < 1e-9);
    assert!(ctrl.report().tripped);
    sampler.set_cpu(10.0);
    assert!(ctrl.acknowledge_trip());
    assert!(!ctrl.report().tripped);
    ctrl.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn lists_processes() {
    let sampler = Arc::new(StaticSampler::new(10.0, 100 * MIB, 20 * MIB));
    sampler.set_processes(vec!["init".into(), "sshd".into()]);
    let ctrl = controller(&sampler).await;
    let names = ctrl.process_names().await.expect("names");
    assert_eq!(names, vec!["init".to_string(), "sshd".to_string()]);
}

#[tokio::test]
async fn allocation_failure_surfaces() {
    // 20% used of an address-space-sized host: the block list cannot be reserved
    let sampler = Arc::new(StaticSampler::new(10.0, u64::MAX, u64::MAX / 5));
    let ctrl = Controller::builder(sampler.clone())
        .clock(Arc::new(ManualClock::new()))
        .config(SimConfig { chunk_bytes: 1, ..SimConfig::default() })
        .build()
        .await
        .expect("build");
    ctrl.start(100.0).expect("start");
    assert!(wait_until(|| ctrl.report().background_failure.is_some()).await);
    let failure = ctrl.report().background_failure.expect("failure");
    assert!(failure.starts_with("allocation failed after 0 of"), "{failure}");
    assert_eq!(ctrl.report().memory_blocks_held, 0);
    ctrl.shutdown().await.expect("shutdown");
}

/// Memory queries from the inflator can be held open and then failed.
struct HeldSampler {
    host: StaticSampler,
    armed: AtomicBool,
    waiting: AtomicBool,
    release: Mutex<mpsc::Receiver<()>>,
}

impl HeldSampler {
    fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let sampler = Self {
            host: StaticSampler::new(10.0, 100 * MIB, 20 * MIB),
            armed: AtomicBool::new(false),
            waiting: AtomicBool::new(false),
            release: Mutex::new(rx),
        };
        (sampler, tx)
    }
}

impl Sampler for HeldSampler {
    fn cpu_percent(&self, interval: Duration) -> SimResult<f64> {
        self.host.cpu_percent(interval)
    }

    fn memory(&self) -> SimResult<MemoryReading> {
        if !self.armed.swap(false, Ordering::AcqRel) {
            return self.host.memory();
        }
        self.waiting.store(true, Ordering::Release);
        let _ = self.release.lock().recv_timeout(Duration::from_secs(10));
        Err(SimError::ResourceQuery("host went away".into()))
    }

    fn process_names(&self) -> SimResult<Vec<String>> {
        self.host.process_names()
    }

    // the safety check must not consume the held query
    fn memory_percent(&self) -> SimResult<f64> {
        self.host.memory_percent()
    }
}

#[tokio::test]
async fn failure_after_stop_does_not_leak_into_next_run() {
    let (sampler, release) = HeldSampler::new();
    let sampler = Arc::new(sampler);
    let ctrl = Controller::builder(sampler.clone())
        .clock(Arc::new(ManualClock::new()))
        .build()
        .await
        .expect("build");

    sampler.armed.store(true, Ordering::Release);
    ctrl.start(100.0).expect("first run");
    assert!(wait_until(|| sampler.waiting.load(Ordering::Acquire)).await);
    ctrl.stop();

    ctrl.start(100.0).expect("second run");
    assert!(wait_until(|| ctrl.report().memory_blocks_held == 20).await);
    release.send(()).expect("release held query");

    ctrl.shutdown().await.expect("shutdown");
    assert_eq!(ctrl.active_tasks(), 0);
    assert!(ctrl.report().background_failure.is_none());
}

#[tokio::test]
async fn trip_belongs_to_its_run() {
    let sampler = Arc::new(StaticSampler::new(10.0, 100 * MIB, 20 * MIB));
    let ctrl = controller(&sampler).await;
    sampler.set_cpu(99.5);
    ctrl.start(100.0).expect("start");
    assert!(wait_until(|| ctrl.report().tripped).await);
    ctrl.shutdown().await.expect("shutdown");
    assert!(ctrl.report().tripped, "last run stays visible until the next start");

    sampler.set_cpu(10.0);
    ctrl.start(100.0).expect("restart");
    assert!(!ctrl.report().tripped);
    assert!(!ctrl.acknowledge_trip());
    ctrl.shutdown().await.expect("shutdown");
}
