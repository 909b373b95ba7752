//! Anomaly classification for a single measurement
//!
//! PFC pause duration is checked first. Only when no pause bar is exceeded
//! is throughput compared against its bars, and a throughput anomaly needs
//! both directions slow in bytes *and* in packets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, MeasurementIncomplete};
use crate::models::{Counter, MeasurementRecord};

/// Classifier bars, loaded once per run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Transmit pause duration above which a PFC anomaly is reported
    pub tx_pfc_bar: f64,
    /// Receive pause duration above which a PFC anomaly is reported
    pub rx_pfc_bar: f64,
    /// Throughput (Gbps) below which a direction counts as slow
    pub bps_bar: f64,
    /// Packet rate below which a direction counts as slow
    pub pps_bar: f64,
}

impl Thresholds {
    pub fn new(tx_pfc_bar: f64, rx_pfc_bar: f64, bps_bar: f64, pps_bar: f64) -> Self {
        Self {
            tx_pfc_bar,
            rx_pfc_bar,
            bps_bar,
            pps_bar,
        }
    }

    /// Reject bars that are negative, NaN or infinite
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, value) in [
            ("tx_pfc_bar", self.tx_pfc_bar),
            ("rx_pfc_bar", self.rx_pfc_bar),
            ("bps_bar", self.bps_bar),
            ("pps_bar", self.pps_bar),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }
}

/// Outcome of classifying one measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    NoAnomaly,
    ThroughputAnomaly,
    PfcAnomaly,
}

impl Classification {
    /// Logical result code: 0 none, -1 PFC, -2 throughput
    pub fn code(&self) -> i32 {
        match self {
            Classification::NoAnomaly => 0,
            Classification::PfcAnomaly => -1,
            Classification::ThroughputAnomaly => -2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Classification::NoAnomaly),
            -1 => Some(Classification::PfcAnomaly),
            -2 => Some(Classification::ThroughputAnomaly),
            _ => None,
        }
    }

    /// Human-readable anomaly tag
    pub fn tag(&self) -> &'static str {
        match self {
            Classification::NoAnomaly => "none",
            Classification::PfcAnomaly => "PFC-pause anomaly",
            Classification::ThroughputAnomaly => "throughput anomaly",
        }
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Classification::NoAnomaly => "none",
            Classification::PfcAnomaly => "pfc",
            Classification::ThroughputAnomaly => "throughput",
        }
    }

    pub fn is_anomaly(&self) -> bool {
        !matches!(self, Classification::NoAnomaly)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Classification plus the data quality of the measurement behind it
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub classification: Classification,
    pub incomplete: Option<MeasurementIncomplete>,
}

/// Classify a measurement against the bars
pub fn classify(record: &MeasurementRecord, bars: &Thresholds) -> Classification {
    inspect(record, bars).classification
}

/// Classify a measurement and report counters that were missing
pub fn inspect(record: &MeasurementRecord, bars: &Thresholds) -> Verdict {
    let exceeds = |counter, bar: f64| record.get(counter).map_or(false, |v| v > bar);
    let below = |counter, bar: f64| record.get(counter).map_or(false, |v| v < bar);

    let classification = if exceeds(Counter::TxPauseDuration, bars.tx_pfc_bar)
        || exceeds(Counter::RxPauseDuration, bars.rx_pfc_bar)
    {
        Classification::PfcAnomaly
    } else if below(Counter::TxBytes, bars.bps_bar)
        && below(Counter::RxBytes, bars.bps_bar)
        && below(Counter::TxPackets, bars.pps_bar)
        && below(Counter::RxPackets, bars.pps_bar)
    {
        Classification::ThroughputAnomaly
    } else {
        Classification::NoAnomaly
    };

    let missing = record.missing();
    Verdict {
        classification,
        incomplete: (!missing.is_empty()).then_some(MeasurementIncomplete { missing }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars() -> Thresholds {
        Thresholds::new(0.0, 0.0, 90.0, 4_000_000.0)
    }

    fn slow_record() -> MeasurementRecord {
        MeasurementRecord::new()
            .with_counter(Counter::TxPauseDuration, 0.0)
            .with_counter(Counter::RxPauseDuration, 0.0)
            .with_counter(Counter::TxBytes, 19.6)
            .with_counter(Counter::RxBytes, 38.5)
            .with_counter(Counter::TxPackets, 1_198_330.0)
            .with_counter(Counter::RxPackets, 1_385_207.0)
    }

    #[test]
    fn test_throughput_anomaly_example() {
        let verdict = inspect(&slow_record(), &bars());
        assert_eq!(verdict.classification, Classification::ThroughputAnomaly);
        assert!(verdict.incomplete.is_none());
    }

    #[test]
    fn test_pfc_takes_precedence() {
        let record = slow_record().with_counter(Counter::RxPauseDuration, 0.01);
        assert_eq!(classify(&record, &bars()), Classification::PfcAnomaly);

        let fast = record
            .with_counter(Counter::TxBytes, 99.0)
            .with_counter(Counter::RxBytes, 99.0);
        assert_eq!(classify(&fast, &bars()), Classification::PfcAnomaly);
    }

    #[test]
    fn test_pause_equal_to_bar_is_not_anomalous() {
        let bars = Thresholds::new(5.0, 5.0, 90.0, 4_000_000.0);
        let record = slow_record().with_counter(Counter::TxPauseDuration, 5.0);
        assert_eq!(classify(&record, &bars), Classification::ThroughputAnomaly);
    }

    #[test]
    fn test_throughput_requires_all_four_conditions() {
        let cases = [
            (Counter::TxBytes, 95.0),
            (Counter::RxBytes, 95.0),
            (Counter::TxPackets, 5_000_000.0),
            (Counter::RxPackets, 5_000_000.0),
        ];
        for (counter, value) in cases {
            let record = slow_record().with_counter(counter, value);
            assert_eq!(
                classify(&record, &bars()),
                Classification::NoAnomaly,
                "{} alone above its bar should clear the anomaly",
                counter
            );
        }
    }

    #[test]
    fn test_missing_counters_do_not_trigger() {
        let mut record = slow_record();
        record.counters.remove(&Counter::RxPackets);

        let verdict = inspect(&record, &bars());
        assert_eq!(verdict.classification, Classification::NoAnomaly);
        assert_eq!(
            verdict.incomplete.unwrap().missing,
            vec![Counter::RxPackets]
        );

        let mut no_pause = slow_record().with_counter(Counter::TxBytes, 100.0);
        no_pause.counters.remove(&Counter::TxPauseDuration);
        assert_eq!(classify(&no_pause, &bars()), Classification::NoAnomaly);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let record = slow_record();
        let first = classify(&record, &bars());
        for _ in 0..10 {
            assert_eq!(classify(&record, &bars()), first);
        }
    }

    #[test]
    fn test_codes_round_trip() {
        for c in [
            Classification::NoAnomaly,
            Classification::PfcAnomaly,
            Classification::ThroughputAnomaly,
        ] {
            assert_eq!(Classification::from_code(c.code()), Some(c));
        }
        assert_eq!(Classification::PfcAnomaly.code(), -1);
        assert_eq!(Classification::from_code(3), None);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(bars().validate().is_ok());
        assert!(matches!(
            Thresholds::new(-1.0, 0.0, 1.0, 1.0).validate(),
            Err(ConfigurationError::InvalidThreshold { name: "tx_pfc_bar", .. })
        ));
        assert!(Thresholds::new(0.0, 0.0, f64::NAN, 1.0).validate().is_err());
    }
}
