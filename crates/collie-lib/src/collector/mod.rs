//! Measurement collection on the host pair
//!
//! This module provides the boundary between the search core and the
//! outside world: running the traffic workload for a point, sampling NIC
//! counters, and gathering per-host latency snapshots.

mod counters;
mod executor;
mod latency;
mod workload;


pub use counters::{counter_command, parse_counters};
pub use executor::{CommandExecutor, CommandOutput, LocalExecutor, SshExecutor};
pub use latency::{
    combine, LatencyAggregator, LatencySource, LatencyStats, RemoteLatencyReader,
    SnapshotChannel, DEFAULT_LATENCY_FILE,
};
pub use workload::{process_pattern, workload_command, Role, WorkloadCollector, WorkloadConfig};

use crate::error::ExecutionFailure;
use crate::models::{Host, MeasurementRecord};
use crate::space::Point;

pub use async_trait::async_trait;

/// Trait for executing a point and measuring the result
#[async_trait]
pub trait MeasurementCollector: Send + Sync {
    /// Stop leftover workload processes from earlier trials; idempotent
    async fn cleanup(&self, hosts: &[Host]) -> Result<(), ExecutionFailure>;

    /// Run the workload for `point` and sample its counters
    async fn execute(
        &self,
        point: &Point,
        hosts: &[Host],
    ) -> Result<MeasurementRecord, ExecutionFailure>;
}
