//! Per-run bookkeeping owned by the search engine

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::Classification;
use crate::models::Trial;

/// Sequence counter and tallies for one search run
///
/// Handed to the result log on every write instead of living in global
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub strategy: String,
    pub seed: u64,
    pub budget: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    next_index: u64,
    pub attempted: u64,
    pub failed: u64,
    pub by_class: BTreeMap<Classification, u64>,
    pub mfs_found: u64,
    pub mfs_skipped: u64,
    pub mfs_reruns: u64,
    #[serde(skip)]
    pub consecutive_failures: u32,
}

impl RunContext {
    pub fn new(strategy: &str, seed: u64, budget: u64) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: started_at.format("%Y%m%dT%H%M%SZ").to_string(),
            strategy: strategy.to_string(),
            seed,
            budget,
            started_at,
            finished_at: None,
            next_index: 0,
            attempted: 0,
            failed: 0,
            by_class: BTreeMap::new(),
            mfs_found: 0,
            mfs_skipped: 0,
            mfs_reruns: 0,
            consecutive_failures: 0,
        }
    }

    /// Claim the next trial index
    pub fn next_index(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub fn remaining(&self) -> u64 {
        self.budget.saturating_sub(self.attempted)
    }

    /// Tally a finished trial
    pub fn record(&mut self, trial: &Trial) {
        self.attempted += 1;
        match trial.classification() {
            Some(classification) => {
                *self.by_class.entry(classification).or_default() += 1;
                self.consecutive_failures = 0;
            }
            None => {
                self.failed += 1;
                self.consecutive_failures += 1;
            }
        }
    }

    pub fn count(&self, classification: Classification) -> u64 {
        self.by_class.get(&classification).copied().unwrap_or(0)
    }

    /// Share of attempted trials that failed to execute
    pub fn failure_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.failed as f64 / self.attempted as f64
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeasurementRecord, TrialOutcome};
    use crate::space::Point;

    fn trial(outcome: TrialOutcome) -> Trial {
        Trial {
            index: 0,
            point: Point::baseline(),
            outcome,
            timestamp: Utc::now(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_indices_are_monotonic() {
        let mut ctx = RunContext::new("random", 1, 3);
        assert_eq!(ctx.next_index(), 0);
        assert_eq!(ctx.next_index(), 1);
        assert_eq!(ctx.next_index(), 2);
    }

    #[test]
    fn test_tallies() {
        let mut ctx = RunContext::new("annealing", 1, 4);
        ctx.record(&trial(TrialOutcome::Measured {
            record: MeasurementRecord::new(),
            classification: Classification::PfcAnomaly,
        }));
        ctx.record(&trial(TrialOutcome::Failed {
            error: "boom".to_string(),
        }));
        ctx.record(&trial(TrialOutcome::Failed {
            error: "boom".to_string(),
        }));

        assert_eq!(ctx.attempted, 3);
        assert_eq!(ctx.failed, 2);
        assert_eq!(ctx.consecutive_failures, 2);
        assert_eq!(ctx.count(Classification::PfcAnomaly), 1);
        assert_eq!(ctx.count(Classification::NoAnomaly), 0);
        assert_eq!(ctx.remaining(), 1);
        assert!((ctx.failure_rate() - 2.0 / 3.0).abs() < 1e-12);
    }
}
