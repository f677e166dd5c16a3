#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tariff_load_sim::{Sampler, SysinfoSampler};

#[test]
fn host_cpu_within_bounds() {
    let sampler = SysinfoSampler::new();
    let cpu = sampler.cpu_percent(Duration::from_millis(200)).expect("cpu");
    assert!((0.0..=100.0).contains(&cpu), "cpu {cpu}");
    thread::sleep(Duration::from_millis(250));
    let cpu = sampler.cpu_percent(Duration::ZERO).expect("cpu since last");
    assert!((0.0..=100.0).contains(&cpu), "cpu {cpu}");
}

#[test]
fn host_memory_reported() {
    let sampler = SysinfoSampler::new();
    let reading = sampler.memory().expect("memory");
    assert!(reading.total_bytes > 0);
    assert!(reading.used_bytes <= reading.total_bytes);
    let percent = sampler.memory_percent().expect("percent");
    assert!((0.0..=100.0).contains(&percent));
}

#[test]
fn host_processes_listed() {
    let names = SysinfoSampler::new().process_names().expect("processes");
    assert!(!names.is_empty());
    assert!(names.windows(2).all(|w| w[0] < w[1]), "sorted and unique");
}

#[test]
fn quick_reading_leaves_interval_reading_alone() {
    let sampler = Arc::new(SysinfoSampler::new());
    let slow = {
        let sampler = Arc::clone(&sampler);
        thread::spawn(move || sampler.cpu_percent(Duration::from_millis(600)))
    };
    let deadline = Instant::now() + Duration::from_secs(2);
    while !sampler.is_measuring() {
        assert!(Instant::now() < deadline, "interval reading never started");
        thread::sleep(Duration::from_millis(5));
    }
    let opened = sampler.last_cpu_refresh().expect("stamped on first refresh");

    thread::sleep(Duration::from_millis(300));
    let quick = sampler.cpu_percent(Duration::ZERO).expect("quick");
    assert!((0.0..=100.0).contains(&quick));
    assert_eq!(sampler.last_cpu_refresh(), Some(opened));

    let cpu = slow.join().expect("join").expect("interval cpu");
    assert!((0.0..=100.0).contains(&cpu));
    assert!(!sampler.is_measuring());
    assert!(sampler.last_cpu_refresh().expect("stamp") > opened);
}
