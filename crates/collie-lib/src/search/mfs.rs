//! Minimal feature set reduction
//!
//! Given a point that triggered a PFC anomaly, reset its non-baseline
//! fields one at a time, in declaration order, keeping every reset that
//! still reproduces the anomaly. The result is 1-minimal with respect to
//! the fields considered, not globally minimal.
//!
//! Each rerun is a single live measurement. A rerun that does not
//! reproduce is taken at face value with no retry, so noisy hosts can
//! leave a field in place that a second run would have removed.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::TrialRunner;
use crate::anomaly::Classification;
use crate::models::MeasurementRecord;
use crate::observability::SearchMetrics;
use crate::space::{Field, ParameterSpace, Point};

/// Outcome of one reduction step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The anomaly still appeared; the field stays reset
    Reproduced,
    /// The anomaly did not appear; the field was restored
    NotReproduced { classification: Classification },
    /// Resetting the field gives an invalid configuration; nothing ran
    Invalid { reason: String },
    /// The rerun could not be executed; the field was restored
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionStep {
    pub field: Field,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// A reduced configuration that still reproduces the anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfsResult {
    /// Index of the trial the reduction started from
    pub origin_index: u64,
    pub original: Point,
    pub point: Point,
    pub classification: Classification,
    /// Fields reset to baseline
    pub dropped: Vec<Field>,
    /// Non-baseline fields that survive, i.e. the feature set itself
    pub remaining: Vec<Field>,
    pub steps: Vec<ReductionStep>,
    /// Measurements executed during reduction
    pub reruns: u64,
    /// Measurement that last reproduced the anomaly
    pub record: MeasurementRecord,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

impl MfsResult {
    /// Whether `point` agrees with this feature set on every surviving field
    pub fn covers(&self, point: &Point) -> bool {
        point.matches_on(&self.point, &self.remaining)
    }
}

impl fmt::Display for MfsResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .remaining
            .iter()
            .map(|field| field.to_string())
            .collect();
        write!(f, "MFS-{} [{}]", self.signature, fields.join(", "))
    }
}

/// Truncated SHA-256 of the point's canonical encoding
pub fn signature(point: &Point) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"mfs-v1:");
    hasher.update(point.to_json().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Reduces PFC-anomalous points to a minimal feature set
pub struct MfsReducer<'a> {
    space: &'a ParameterSpace,
    runner: &'a TrialRunner,
    metrics: SearchMetrics,
}

impl<'a> MfsReducer<'a> {
    pub fn new(space: &'a ParameterSpace, runner: &'a TrialRunner) -> Self {
        Self {
            space,
            runner,
            metrics: SearchMetrics::new(),
        }
    }

    /// Reduce `point`, which produced `record` in trial `origin_index`
    ///
    /// Runs at most one rerun per non-baseline field of `point`.
    pub async fn reduce(
        &self,
        origin_index: u64,
        point: &Point,
        record: &MeasurementRecord,
    ) -> MfsResult {
        let target = Classification::PfcAnomaly;
        let mut current = *point;
        let mut current_record = record.clone();
        let mut steps = Vec::new();
        let mut dropped = Vec::new();
        let mut reruns = 0u64;

        for field in point.non_default_fields() {
            let drop: BTreeSet<Field> = [field].into_iter().collect();
            let candidate = match self.space.project(&current, &drop) {
                Ok(candidate) => candidate,
                Err(e) => {
                    debug!(field = %field, reason = %e.reason, "Reset gives an invalid point, skipping");
                    steps.push(ReductionStep {
                        field,
                        outcome: StepOutcome::Invalid { reason: e.reason },
                    });
                    continue;
                }
            };

            reruns += 1;
            self.metrics.inc_mfs_reruns();

            let outcome = match self.runner.measure(&candidate).await {
                Ok((rerun_record, verdict)) if verdict.classification == target => {
                    current = candidate;
                    current_record = rerun_record;
                    dropped.push(field);
                    StepOutcome::Reproduced
                }
                Ok((_, verdict)) => {
                    debug!(
                        field = %field,
                        classification = %verdict.classification,
                        "Reduction inconclusive, restoring field"
                    );
                    StepOutcome::NotReproduced {
                        classification: verdict.classification,
                    }
                }
                Err(e) => {
                    debug!(field = %field, error = %e, "Reduction rerun failed, restoring field");
                    StepOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            steps.push(ReductionStep { field, outcome });
        }

        let result = MfsResult {
            origin_index,
            original: *point,
            point: current,
            classification: target,
            dropped,
            remaining: current.non_default_fields(),
            steps,
            reruns,
            record: current_record,
            signature: signature(&current),
            timestamp: Utc::now(),
        };

        info!(
            origin = origin_index,
            reruns = result.reruns,
            remaining = result.remaining.len(),
            signature = %result.signature,
            "Minimal feature set computed"
        );
        result
    }
}
