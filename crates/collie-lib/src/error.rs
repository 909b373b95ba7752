//! Error kinds for the search core
//!
//! Only configuration errors are fatal. Everything that can go wrong
//! during a single trial degrades to "skip and continue".

use std::time::Duration;

use thiserror::Error;

use crate::space::Field;

/// Invalid or missing run configuration, detected before the search starts
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("threshold `{name}` must be a finite non-negative number, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("at least {required} hosts are required, got {actual}")]
    NotEnoughHosts { required: usize, actual: usize },

    #[error("monitor host index {index} is out of range for {hosts} hosts")]
    MonitorHostOutOfRange { index: usize, hosts: usize },

    #[error("iteration budget must be greater than zero")]
    ZeroIterations,

    #[error("domain for `{0}` is empty or cannot produce a valid point")]
    EmptyDomain(Field),

    #[error("invalid range for `{field}`: {min}..={max}")]
    InvalidRange { field: Field, min: u32, max: u32 },

    #[error("annealing parameter `{name}` out of range: {value}")]
    InvalidAnnealing { name: &'static str, value: f64 },

    #[error("{0}")]
    Other(String),
}

/// Workload setup or execution failed for one trial
#[derive(Debug, Clone, Error)]
pub enum ExecutionFailure {
    #[error("workload setup failed on {host}: {reason}")]
    Setup { host: String, reason: String },

    #[error("command on {host} exited with status {status}: {stderr}")]
    Command {
        host: String,
        status: i32,
        stderr: String,
    },

    #[error("trial exceeded its time bound of {0:?}")]
    Timeout(Duration),

    #[error("failed to read counters on {host}: {reason}")]
    Counters { host: String, reason: String },

    #[error("transport error on {host}: {reason}")]
    Transport { host: String, reason: String },
}

/// A point violates a structural constraint and must never be executed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid point: {reason}")]
pub struct InvalidPoint {
    pub reason: String,
}

impl InvalidPoint {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A host's latency snapshot could not be read
#[derive(Debug, Clone, Error)]
#[error("latency snapshot unavailable on {host}: {reason}")]
pub struct CollectionFailure {
    pub host: String,
    pub reason: String,
}

/// Some counters the classifier consults were not measured
///
/// Missing counters never satisfy an anomaly inequality; this report lets
/// the caller surface the gap instead of silently treating it as zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("measurement incomplete, missing counters: {}", format_counters(.missing))]
pub struct MeasurementIncomplete {
    pub missing: Vec<crate::models::Counter>,
}

fn format_counters(counters: &[crate::models::Counter]) -> String {
    counters
        .iter()
        .map(|c| c.metric_name())
        .collect::<Vec<_>>()
        .join(", ")
}
