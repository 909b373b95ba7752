//! Exploration strategies
//!
//! Both strategies share the trial pipeline and differ only in how the
//! next point is chosen and whether the outcome of a trial feeds back
//! into that choice.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anomaly::{Classification, Thresholds};
use crate::error::ConfigurationError;
use crate::models::{Counter, MeasurementRecord};
use crate::space::{ParameterSpace, Point, DEFAULT_MAX_PERTURBED_FIELDS};

/// Which exploration strategy drives the search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Random,
    #[default]
    Annealing,
}

/// Run-level knobs for simulated annealing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealingConfig {
    pub initial_temperature: f64,
    /// Geometric decay factor applied once per iteration
    pub cooling_rate: f64,
    pub min_temperature: f64,
    pub max_perturbed_fields: usize,
    /// Weight of the measurement-derived pressure term, in [0, 1)
    pub measurement_weight: f64,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            initial_temperature: 1.0,
            cooling_rate: 0.95,
            min_temperature: 1e-3,
            max_perturbed_fields: DEFAULT_MAX_PERTURBED_FIELDS,
            measurement_weight: 0.5,
        }
    }
}

impl AnnealingConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let bad = |name, value| Err(ConfigurationError::InvalidAnnealing { name, value });

        if !(self.initial_temperature.is_finite() && self.initial_temperature > 0.0) {
            return bad("initial_temperature", self.initial_temperature);
        }
        if !(self.cooling_rate > 0.0 && self.cooling_rate <= 1.0) {
            return bad("cooling_rate", self.cooling_rate);
        }
        if !(self.min_temperature > 0.0 && self.min_temperature <= self.initial_temperature) {
            return bad("min_temperature", self.min_temperature);
        }
        if self.max_perturbed_fields == 0 {
            return bad("max_perturbed_fields", 0.0);
        }
        if !(0.0..1.0).contains(&self.measurement_weight) {
            return bad("measurement_weight", self.measurement_weight);
        }
        Ok(())
    }

    /// Temperature at iteration `step`
    pub fn temperature(&self, step: u64) -> f64 {
        let exponent = step.min(i32::MAX as u64) as i32;
        (self.initial_temperature * self.cooling_rate.powi(exponent)).max(self.min_temperature)
    }
}

/// How interesting a measured outcome is; higher is more anomalous
///
/// The class score keeps PFC above throughput above none, and the
/// weighted pressure term (always below 1) orders outcomes within a class.
pub fn severity(
    classification: Classification,
    record: &MeasurementRecord,
    bars: &Thresholds,
    measurement_weight: f64,
) -> f64 {
    let (base, pressure) = match classification {
        Classification::PfcAnomaly => (2.0, pause_pressure(record, bars)),
        Classification::ThroughputAnomaly => (1.0, throughput_pressure(record, bars)),
        Classification::NoAnomaly => (0.0, throughput_pressure(record, bars)),
    };
    base + measurement_weight * pressure.clamp(0.0, 1.0)
}

/// Excess pause duration over the bar, squashed into [0, 1)
fn pause_pressure(record: &MeasurementRecord, bars: &Thresholds) -> f64 {
    let excess = [
        (Counter::TxPauseDuration, bars.tx_pfc_bar),
        (Counter::RxPauseDuration, bars.rx_pfc_bar),
    ]
    .into_iter()
    .filter_map(|(c, bar)| record.get(c).map(|v| v - bar))
    .fold(0.0_f64, f64::max);

    excess / (excess + 1.0)
}

/// Mean shortfall of byte throughput below the bar, in [0, 1]
fn throughput_pressure(record: &MeasurementRecord, bars: &Thresholds) -> f64 {
    if bars.bps_bar <= 0.0 {
        return 0.0;
    }
    let shortfalls: Vec<f64> = [Counter::TxBytes, Counter::RxBytes]
        .into_iter()
        .filter_map(|c| record.get(c))
        .map(|v| (1.0 - v / bars.bps_bar).clamp(0.0, 1.0))
        .collect();

    if shortfalls.is_empty() {
        0.0
    } else {
        shortfalls.iter().sum::<f64>() / shortfalls.len() as f64
    }
}

/// What a strategy did with an evaluated candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected,
    /// The trial failed and carries no information
    Skipped,
}

/// Chooses the next point and learns from evaluated ones
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Next point to evaluate
    fn propose(&mut self, space: &ParameterSpace, rng: &mut StdRng) -> Point;

    /// Feed back the severity of the proposed point; `None` for a failed trial
    fn observe(&mut self, point: &Point, severity: Option<f64>, rng: &mut StdRng) -> Decision;

    /// Current temperature, if the strategy has one
    fn temperature(&self) -> Option<f64> {
        None
    }
}

/// Independent uniform draws
#[derive(Debug, Default)]
pub struct RandomSearch;

impl Strategy for RandomSearch {
    fn name(&self) -> &'static str {
        "random"
    }

    fn propose(&mut self, space: &ParameterSpace, rng: &mut StdRng) -> Point {
        space.sample(rng)
    }

    fn observe(&mut self, _point: &Point, severity: Option<f64>, _rng: &mut StdRng) -> Decision {
        match severity {
            Some(_) => Decision::Accepted,
            None => Decision::Skipped,
        }
    }
}

/// Simulated annealing that climbs towards more severe anomalies
#[derive(Debug)]
pub struct Annealing {
    config: AnnealingConfig,
    current: Option<(Point, f64)>,
    step: u64,
}

impl Annealing {
    pub fn new(config: AnnealingConfig) -> Self {
        Self {
            config,
            current: None,
            step: 0,
        }
    }

    /// Point and severity the walk currently sits on
    pub fn current(&self) -> Option<(Point, f64)> {
        self.current
    }

    /// Probability of accepting a move that changes severity by `delta`
    pub fn acceptance_probability(delta: f64, temperature: f64) -> f64 {
        if delta >= 0.0 {
            1.0
        } else {
            (delta / temperature).exp()
        }
    }
}

impl Strategy for Annealing {
    fn name(&self) -> &'static str {
        "annealing"
    }

    fn propose(&mut self, space: &ParameterSpace, rng: &mut StdRng) -> Point {
        match &self.current {
            None => space.sample(rng),
            Some((point, _)) => space.neighbor(point, self.config.max_perturbed_fields, rng),
        }
    }

    fn observe(&mut self, point: &Point, severity: Option<f64>, rng: &mut StdRng) -> Decision {
        let temperature = self.config.temperature(self.step);
        self.step += 1;

        let Some(severity) = severity else {
            return Decision::Skipped;
        };

        let accept = match self.current {
            None => true,
            Some((_, current)) => {
                let probability =
                    Self::acceptance_probability(severity - current, temperature);
                probability >= 1.0 || rng.random::<f64>() < probability
            }
        };

        if accept {
            debug!(severity, temperature, "Annealing move accepted");
            self.current = Some((*point, severity));
            Decision::Accepted
        } else {
            debug!(severity, temperature, "Annealing move rejected");
            Decision::Rejected
        }
    }

    fn temperature(&self) -> Option<f64> {
        Some(self.config.temperature(self.step))
    }
}

/// Build the strategy selected by `kind`
pub fn build_strategy(kind: StrategyKind, annealing: AnnealingConfig) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Random => Box::new(RandomSearch),
        StrategyKind::Annealing => Box::new(Annealing::new(annealing)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{PointDraft, SpaceConfig};
    use rand::SeedableRng;

    fn bars() -> Thresholds {
        Thresholds::new(0.0, 0.0, 90.0, 4_000_000.0)
    }

    fn record(tx_bytes: f64, rx_pause: f64) -> MeasurementRecord {
        MeasurementRecord::new()
            .with_counter(Counter::TxBytes, tx_bytes)
            .with_counter(Counter::RxBytes, tx_bytes)
            .with_counter(Counter::RxPauseDuration, rx_pause)
    }

    #[test]
    fn test_severity_orders_classes() {
        let w = 0.99;
        let worst_none = severity(Classification::NoAnomaly, &record(0.0, 0.0), &bars(), w);
        let best_tput =
            severity(Classification::ThroughputAnomaly, &record(89.0, 0.0), &bars(), w);
        let worst_tput =
            severity(Classification::ThroughputAnomaly, &record(0.0, 0.0), &bars(), w);
        let mild_pfc = severity(Classification::PfcAnomaly, &record(100.0, 0.001), &bars(), w);

        assert!(worst_none < best_tput);
        assert!(worst_tput < mild_pfc);
        assert!(best_tput < worst_tput);
    }

    #[test]
    fn test_severity_grows_with_pause() {
        let w = 0.5;
        let small = severity(Classification::PfcAnomaly, &record(50.0, 1.0), &bars(), w);
        let large = severity(Classification::PfcAnomaly, &record(50.0, 1000.0), &bars(), w);
        assert!(large > small);
        assert!(large < 3.0);
    }

    #[test]
    fn test_temperature_schedule() {
        let config = AnnealingConfig {
            initial_temperature: 2.0,
            cooling_rate: 0.5,
            min_temperature: 0.1,
            ..Default::default()
        };
        assert_eq!(config.temperature(0), 2.0);
        assert_eq!(config.temperature(1), 1.0);
        assert_eq!(config.temperature(2), 0.5);
        assert_eq!(config.temperature(10), 0.1);
    }

    #[test]
    fn test_annealing_config_validation() {
        assert!(AnnealingConfig::default().validate().is_ok());
        let bad = AnnealingConfig {
            measurement_weight: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = AnnealingConfig {
            cooling_rate: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_acceptance_probability() {
        assert_eq!(Annealing::acceptance_probability(0.5, 1.0), 1.0);
        assert_eq!(Annealing::acceptance_probability(0.0, 1.0), 1.0);
        let p = Annealing::acceptance_probability(-1.0, 1.0);
        assert!((p - (-1.0f64).exp()).abs() < 1e-12);
        assert!(Annealing::acceptance_probability(-1.0, 0.001) < 1e-100);
    }

    #[test]
    fn test_annealing_always_accepts_more_severe() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut annealing = Annealing::new(AnnealingConfig::default());
        let a = Point::baseline();
        let b = PointDraft {
            num_qp: 4,
            ..Default::default()
        }
        .validate()
        .unwrap();

        assert_eq!(annealing.observe(&a, Some(0.2), &mut rng), Decision::Accepted);
        assert_eq!(annealing.observe(&b, Some(2.1), &mut rng), Decision::Accepted);
        assert_eq!(annealing.current(), Some((b, 2.1)));
    }

    #[test]
    fn test_annealing_cold_rejects_less_severe() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut annealing = Annealing::new(AnnealingConfig {
            initial_temperature: 1e-3,
            min_temperature: 1e-3,
            ..Default::default()
        });
        let a = Point::baseline();
        let b = PointDraft {
            burst_size: 8,
            ..Default::default()
        }
        .validate()
        .unwrap();

        annealing.observe(&a, Some(2.0), &mut rng);
        assert_eq!(annealing.observe(&b, Some(0.0), &mut rng), Decision::Rejected);
        assert_eq!(annealing.current(), Some((a, 2.0)));
    }

    #[test]
    fn test_failed_trial_leaves_state_untouched() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut annealing = Annealing::new(AnnealingConfig::default());
        let a = Point::baseline();

        annealing.observe(&a, Some(1.0), &mut rng);
        let before = annealing.temperature().unwrap();
        assert_eq!(annealing.observe(&a, None, &mut rng), Decision::Skipped);
        assert_eq!(annealing.current(), Some((a, 1.0)));
        assert!(annealing.temperature().unwrap() < before);
    }

    #[test]
    fn test_annealing_proposes_neighbours_after_first_accept() {
        let space = ParameterSpace::new(SpaceConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let mut annealing = Annealing::new(AnnealingConfig {
            max_perturbed_fields: 1,
            ..Default::default()
        });

        let first = annealing.propose(&space, &mut rng);
        annealing.observe(&first, Some(0.0), &mut rng);

        let next = annealing.propose(&space, &mut rng);
        assert!(next.draft().validate().is_ok());
        assert_ne!(next, first);
    }
}
