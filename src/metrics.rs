#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{Context, Result as AnyResult};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub running: IntGauge,
    pub target_cpu_percent: Gauge,
    pub target_memory_percent: Gauge,
    pub throttle_average_percent: Gauge,
    pub throttle_ticks_total: IntCounter,
    pub memory_blocks_held: IntGauge,
    pub safety_trips_total: IntCounter,
    pub samples_total: IntCounter,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> AnyResult<Gauge> {
    let g = Gauge::with_opts(Opts::new(name, help)).with_context(|| format!("create {name}"))?;
    registry
        .register(Box::new(g.clone()))
        .with_context(|| format!("register {name}"))?;
    Ok(g)
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> AnyResult<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, help)).with_context(|| format!("create {name}"))?;
    registry
        .register(Box::new(g.clone()))
        .with_context(|| format!("register {name}"))?;
    Ok(g)
}

fn counter(registry: &Registry, name: &str, help: &str) -> AnyResult<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help)).with_context(|| format!("create {name}"))?;
    registry
        .register(Box::new(c.clone()))
        .with_context(|| format!("register {name}"))?;
    Ok(c)
}

impl Metrics {
    pub fn new() -> AnyResult<Self> {
        let registry = Registry::new();
        let running =
            int_gauge(&registry, "tariff_sim_running", "1 while a simulation run is active")?;
        let target_cpu_percent =
            gauge(&registry, "tariff_sim_target_cpu_percent", "cpu percent the throttle targets")?;
        let target_memory_percent = gauge(
            &registry,
            "tariff_sim_target_memory_percent",
            "memory percent the inflator aims for",
        )?;
        let throttle_average_percent = gauge(
            &registry,
            "tariff_sim_throttle_average_percent",
            "smoothed cpu percent observed by the throttle",
        )?;
        let throttle_ticks_total =
            counter(&registry, "tariff_sim_throttle_ticks_total", "throttle windows completed")?;
        let memory_blocks_held =
            int_gauge(&registry, "tariff_sim_memory_blocks_held", "inflator blocks held")?;
        let safety_trips_total =
            counter(&registry, "tariff_sim_safety_trips_total", "critical usage trips")?;
        let samples_total =
            counter(&registry, "tariff_sim_samples_total", "usage samples recorded")?;
        Ok(Self {
            registry,
            running,
            target_cpu_percent,
            target_memory_percent,
            throttle_average_percent,
            throttle_ticks_total,
            memory_blocks_held,
            safety_trips_total,
            samples_total,
        })
    }

    pub fn encode_text(&self) -> AnyResult<Vec<u8>> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf).context("encode metrics")?;
        Ok(buf)
    }
}
