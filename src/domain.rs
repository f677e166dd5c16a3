#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use serde::{Deserialize, Serialize};

use crate::error::SimResult;
use crate::validation::validate_rate;

/// Host usage measured before any load is applied. Fixed for a controller's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    /// Wall-clock seconds since the Unix epoch.
    pub timestamp: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub tariff_rate: f64,
    pub target_cpu: f64,
    pub target_memory: f64,
}

impl TargetState {
    pub fn derive(baseline: &BaselineSnapshot, tariff_rate: f64) -> SimResult<Self> {
        let tariff_rate = validate_rate(tariff_rate)?;
        Ok(Self {
            tariff_rate,
            target_cpu: scaled_target(baseline.cpu_percent, tariff_rate),
            target_memory: scaled_target(baseline.memory_percent, tariff_rate),
        })
    }
}

/// `baseline * (1 + rate/100)`, never above 100.
pub fn scaled_target(baseline_percent: f64, tariff_rate: f64) -> f64 {
    (baseline_percent * (1.0 + tariff_rate / 100.0)).min(100.0)
}

/// Relative change against the baseline; a zero baseline yields 0.
pub fn increase_ratio(current: f64, baseline: f64) -> f64 {
    if baseline > 0.0 {
        (current - baseline) / baseline
    } else {
        0.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => f.write_str("IDLE"),
            RunState::Running => f.write_str("RUNNING"),
            RunState::Stopped => f.write_str("STOPPED"),
        }
    }
}

/// Emitted by the safety trip when usage crosses the critical threshold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CriticalUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub threshold: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub baseline_cpu: f64,
    pub baseline_memory: f64,
    pub current_cpu: f64,
    pub current_memory: f64,
    pub cpu_increase_ratio: f64,
    pub memory_increase_ratio: f64,
    pub state: RunState,
    pub target: Option<TargetState>,
    pub throttle_average: f64,
    pub throttle_ticks: u64,
    pub memory_blocks_held: usize,
    pub tripped: bool,
    pub background_failure: Option<String>,
}
