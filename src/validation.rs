#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use crate::config::SimConfig;
use crate::error::{SimError, SimResult};

fn invalid(reason: impl Into<String>) -> SimError {
    SimError::InvalidInput(reason.into())
}

pub fn validate_rate(tariff_rate: f64) -> SimResult<f64> {
    if !tariff_rate.is_finite() {
        return Err(invalid("tariff_rate must be a finite number"));
    }
    if tariff_rate <= 0.0 {
        return Err(invalid(format!("tariff_rate must be > 0, got {tariff_rate}")));
    }
    Ok(tariff_rate)
}

pub fn validate_config(cfg: &SimConfig) -> SimResult<()> {
    if cfg.window_ms == 0 {
        return Err(invalid("window_ms must be > 0"));
    }
    if cfg.chunk_bytes == 0 {
        return Err(invalid("chunk_bytes must be > 0"));
    }
    if cfg.baseline_samples == 0 {
        return Err(invalid("baseline_samples must be > 0"));
    }
    if !cfg.kp.is_finite() || !cfg.kd.is_finite() {
        return Err(invalid("kp and kd must be finite"));
    }
    if !(0.0..1.0).contains(&cfg.smoothing) {
        return Err(invalid("smoothing must be in [0, 1)"));
    }
    if !(cfg.critical_percent > 0.0 && cfg.critical_percent <= 100.0) {
        return Err(invalid("critical_percent must be in (0, 100]"));
    }
    Ok(())
}
