//! Search and diagnosis library for RDMA traffic anomalies
//!
//! This crate provides the core functionality for:
//! - Modelling the traffic configuration space
//! - Running the workload on a host pair and collecting counters and latency
//! - Classifying measurements as PFC or throughput anomalies
//! - Random and simulated-annealing search with minimal feature set reduction
//! - The append-only result log, health checks and observability

pub mod anomaly;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod results;
pub mod search;
pub mod space;

pub use anomaly::{classify, Classification, Thresholds};
pub use error::{
    CollectionFailure, ConfigurationError, ExecutionFailure, InvalidPoint, MeasurementIncomplete,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
    SearchProgress,
};
pub use models::*;
pub use observability::{SearchMetrics, StructuredLogger};
pub use results::{ResultLog, ResultReader, RunSummary};
pub use search::{MfsResult, RunContext, SearchConfig, SearchEngine, SearchReport, StrategyKind};
pub use space::{Field, ParameterSpace, Point, SpaceConfig};
