#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! Simulator tuning, loaded from an optional file and `TARIFF_SIM_*` env vars.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "TARIFF_SIM";
pub const MIB: usize = 1024 * 1024;

/// Unit the PD adjustment is expressed in before it is added to the work time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainUnits {
    /// Adjustment is percentage points of the window.
    #[default]
    Percent,
    /// Adjustment is added as seconds, unscaled.
    Seconds,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Length of one throttle window in milliseconds.
    pub window_ms: u64,
    /// Proportional gain.
    pub kp: f64,
    /// Derivative gain.
    pub kd: f64,
    /// How `kp`/`kd` output maps onto work time.
    pub gain_units: GainUnits,
    /// Weight of the previous smoothed average in the moving average.
    pub smoothing: f64,
    /// CPU or memory percent at which the safety trip fires.
    pub critical_percent: f64,
    /// Size of one inflator block in bytes.
    pub chunk_bytes: usize,
    /// Number of readings averaged into the baseline.
    pub baseline_samples: usize,
    /// How long a CPU reading observes the host, in milliseconds.
    pub sample_interval_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            window_ms: 100,
            kp: 0.1,
            kd: 0.001,
            gain_units: GainUnits::Percent,
            smoothing: 0.9,
            critical_percent: 99.0,
            chunk_bytes: MIB,
            baseline_samples: 3,
            sample_interval_ms: 100,
        }
    }
}

impl SimConfig {
    /// Defaults, overlaid by `path` (if given) and then by the environment.
    pub fn load(path: Option<&Path>) -> AnyResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("build simulator config")?;
        cfg.try_deserialize().context("deserialize simulator config")
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}
