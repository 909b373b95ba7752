//! Observability infrastructure for the search
//!
//! Provides:
//! - Prometheus metrics (trial outcomes, trial duration, MFS activity, annealing state)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    Gauge, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::anomaly::Classification;
use crate::models::{Counter, Trial};
use crate::search::{MfsResult, RunContext};
use crate::space::Point;

/// Histogram buckets for trial wall time (in seconds)
const TRIAL_DURATION_BUCKETS: &[f64] = &[1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SearchMetricsInner> = OnceLock::new();

struct SearchMetricsInner {
    trials: IntCounterVec,
    trial_duration_seconds: Histogram,
    mfs_found: IntCounter,
    mfs_skipped: IntCounter,
    mfs_reruns: IntCounter,
    temperature: Gauge,
    severity: Gauge,
    missing_counters: IntCounter,
    collection_failures: IntCounter,
}

impl SearchMetricsInner {
    fn new() -> Self {
        Self {
            trials: register_int_counter_vec!(
                "collie_trials_total",
                "Trials attempted, by outcome",
                &["outcome"]
            )
            .expect("Failed to register trials_total"),

            trial_duration_seconds: register_histogram!(
                "collie_trial_duration_seconds",
                "Wall time of one trial, cleanup to classification",
                TRIAL_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register trial_duration_seconds"),

            mfs_found: register_int_counter!(
                "collie_mfs_found_total",
                "Minimal feature sets computed"
            )
            .expect("Failed to register mfs_found_total"),

            mfs_skipped: register_int_counter!(
                "collie_mfs_skipped_total",
                "PFC anomalies already covered by a known feature set"
            )
            .expect("Failed to register mfs_skipped_total"),

            mfs_reruns: register_int_counter!(
                "collie_mfs_reruns_total",
                "Measurements executed while reducing feature sets"
            )
            .expect("Failed to register mfs_reruns_total"),

            temperature: register_gauge!(
                "collie_annealing_temperature",
                "Current annealing temperature"
            )
            .expect("Failed to register annealing_temperature"),

            severity: register_gauge!(
                "collie_last_severity",
                "Severity of the most recent measured trial"
            )
            .expect("Failed to register last_severity"),

            missing_counters: register_int_counter!(
                "collie_missing_counters_total",
                "Counters absent from a measurement"
            )
            .expect("Failed to register missing_counters_total"),

            collection_failures: register_int_counter!(
                "collie_collection_failures_total",
                "Per-host latency snapshot reads that failed"
            )
            .expect("Failed to register collection_failures_total"),
        }
    }
}

/// Search metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct SearchMetrics {
    _private: (),
}

impl Default for SearchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SearchMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SearchMetricsInner {
        GLOBAL_METRICS.get_or_init(SearchMetricsInner::new)
    }

    /// Count a trial under `outcome` (a classification label or "failed")
    pub fn inc_trial(&self, outcome: &str) {
        self.inner().trials.with_label_values(&[outcome]).inc();
    }

    pub fn observe_trial_duration(&self, duration_secs: f64) {
        self.inner().trial_duration_seconds.observe(duration_secs);
    }

    pub fn inc_mfs(&self) {
        self.inner().mfs_found.inc();
    }

    pub fn inc_mfs_skipped(&self) {
        self.inner().mfs_skipped.inc();
    }

    pub fn inc_mfs_reruns(&self) {
        self.inner().mfs_reruns.inc();
    }

    pub fn set_temperature(&self, temperature: f64) {
        self.inner().temperature.set(temperature);
    }

    pub fn set_severity(&self, severity: f64) {
        self.inner().severity.set(severity);
    }

    pub fn inc_missing_counters(&self, count: usize) {
        self.inner().missing_counters.inc_by(count as u64);
    }

    pub fn inc_collection_failures(&self) {
        self.inner().collection_failures.inc();
    }
}

/// Structured logger for search events
///
/// Every event carries `event` and `run_id` fields so a run's log lines can
/// be pulled out of a shared JSON stream.
#[derive(Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn log_search_started(&self, ctx: &RunContext, hosts: usize) {
        info!(
            event = "search_started",
            run_id = %self.run_id,
            strategy = %ctx.strategy,
            seed = ctx.seed,
            budget = ctx.budget,
            hosts = hosts,
            "Anomaly search started"
        );
    }

    /// Log a measured trial; anomalies are raised to warn
    pub fn log_trial(&self, trial: &Trial, severity: Option<f64>) {
        let Some(classification) = trial.classification() else {
            return;
        };
        let point = trial.point.to_json();

        if classification.is_anomaly() {
            warn!(
                event = "trial_completed",
                run_id = %self.run_id,
                index = trial.index,
                classification = %classification,
                code = classification.code(),
                severity = ?severity,
                duration_ms = trial.duration_ms,
                point = %point,
                "Anomaly found"
            );
        } else {
            info!(
                event = "trial_completed",
                run_id = %self.run_id,
                index = trial.index,
                classification = %classification,
                code = classification.code(),
                severity = ?severity,
                duration_ms = trial.duration_ms,
                "Trial completed"
            );
        }
    }

    pub fn log_trial_failed(&self, index: u64, point: &Point, error: &str) {
        warn!(
            event = "trial_failed",
            run_id = %self.run_id,
            index = index,
            point = %point.to_json(),
            error = %error,
            "Trial could not be executed"
        );
    }

    /// Log counters that were absent from a measurement
    pub fn log_data_quality(&self, index: u64, missing: &[Counter], classification: Classification) {
        let missing: Vec<&str> = missing.iter().map(|c| c.metric_name()).collect();
        warn!(
            event = "data_quality",
            run_id = %self.run_id,
            index = index,
            missing = ?missing,
            classification = %classification,
            "Measurement incomplete, classified on the counters present"
        );
    }

    pub fn log_mfs(&self, mfs: &MfsResult) {
        let remaining: Vec<&str> = mfs.remaining.iter().map(|f| f.name()).collect();
        warn!(
            event = "mfs_computed",
            run_id = %self.run_id,
            origin = mfs.origin_index,
            signature = %mfs.signature,
            remaining = ?remaining,
            reruns = mfs.reruns,
            point = %mfs.point.to_json(),
            "Minimal feature set for PFC anomaly"
        );
    }

    pub fn log_mfs_skipped(&self, index: u64, signature: &str) {
        info!(
            event = "mfs_skipped",
            run_id = %self.run_id,
            index = index,
            covered_by = %signature,
            "PFC anomaly covered by a known feature set"
        );
    }

    pub fn log_search_finished(&self, ctx: &RunContext, reason: &str) {
        info!(
            event = "search_finished",
            run_id = %self.run_id,
            reason = %reason,
            attempted = ctx.attempted,
            failed = ctx.failed,
            pfc = ctx.count(Classification::PfcAnomaly),
            throughput = ctx.count(Classification::ThroughputAnomaly),
            mfs = ctx.mfs_found,
            "Anomaly search finished"
        );
    }
}
