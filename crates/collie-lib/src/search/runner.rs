//! Single-trial measurement pipeline
//!
//! cleanup -> execute (time bounded) -> aggregate latency -> classify.
//! Exactly one trial is in flight at a time because the workload and the
//! per-host latency file are single-instance resources.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::anomaly::{inspect, Thresholds, Verdict};
use crate::collector::{LatencyAggregator, LatencySource, MeasurementCollector};
use crate::error::ExecutionFailure;
use crate::models::{Host, MeasurementRecord};
use crate::observability::SearchMetrics;
use crate::space::Point;

/// Executes and classifies points on the host pair
pub struct TrialRunner {
    collector: Arc<dyn MeasurementCollector>,
    latency: LatencyAggregator,
    hosts: Vec<Host>,
    bars: Thresholds,
    timeout: Duration,
    metrics: SearchMetrics,
}

impl TrialRunner {
    pub fn new(
        collector: Arc<dyn MeasurementCollector>,
        latency_source: Arc<dyn LatencySource>,
        hosts: Vec<Host>,
        bars: Thresholds,
        timeout: Duration,
    ) -> Self {
        Self {
            collector,
            latency: LatencyAggregator::new(latency_source),
            hosts,
            bars,
            timeout,
            metrics: SearchMetrics::new(),
        }
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn bars(&self) -> &Thresholds {
        &self.bars
    }

    /// Run one point end to end
    pub async fn measure(
        &self,
        point: &Point,
    ) -> Result<(MeasurementRecord, Verdict), ExecutionFailure> {
        self.collector.cleanup(&self.hosts).await?;

        let mut record = tokio::time::timeout(self.timeout, self.collector.execute(point, &self.hosts))
            .await
            .map_err(|_| ExecutionFailure::Timeout(self.timeout))??;

        let (latency, failures) = self.latency.collect(&self.hosts).await;
        for failure in &failures {
            warn!(host = %failure.host, reason = %failure.reason, "Latency snapshot unavailable");
            self.metrics.inc_collection_failures();
        }
        record.latency = latency;

        let verdict = inspect(&record, &self.bars);
        Ok((record, verdict))
    }
}
