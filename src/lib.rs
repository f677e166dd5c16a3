#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod lib_cpu;
pub mod lib_mem;
pub mod metrics;
pub mod reporter;
pub mod runtime;
pub mod safety;
pub mod sampler;
pub mod service;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GainUnits, SimConfig};
pub use domain::{
    BaselineSnapshot, CriticalUsage, ResourceReport, RunState, TargetState, UsageSample,
};
pub use error::{SimError, SimResult};
pub use metrics::Metrics;
pub use runtime::block_on_with_grace;
pub use sampler::{MemoryReading, Sampler, StaticSampler, SysinfoSampler};
pub use service::{Controller, ControllerBuilder};
pub use validation::{validate_config, validate_rate};
