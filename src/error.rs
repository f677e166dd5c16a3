#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum SimError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("resource query failed: {0}")]
    ResourceQuery(String),
    #[error("simulation already running")]
    AlreadyRunning,
    #[error("allocation failed after {allocated} of {planned} blocks")]
    Allocation { allocated: usize, planned: usize },
    #[error("background task failed: {0}")]
    Task(String),
    #[error("metrics setup failed: {0}")]
    Metrics(String),
}

pub type SimResult<T> = Result<T, SimError>;
