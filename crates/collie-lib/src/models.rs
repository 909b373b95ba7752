//! Core data models for the search engine

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::Classification;
use crate::collector::LatencyStats;
use crate::space::Point;

/// One machine of the tested pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    /// Human-readable identity used in logs
    pub name: String,
    /// Address used to reach the host and as the peer address for traffic
    pub address: String,
    /// RDMA NIC interface whose counters are read
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Remote login user
    #[serde(default)]
    pub user: Option<String>,
}

fn default_interface() -> String {
    "eth0".to_string()
}

impl Host {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            interface: default_interface(),
            user: None,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// `user@address` or just the address
    pub fn login(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// NIC counters the classifier depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    /// Transmit throughput in Gbps
    TxBytes,
    /// Receive throughput in Gbps
    RxBytes,
    /// Transmit packets per second
    TxPackets,
    /// Receive packets per second
    RxPackets,
    /// PFC pause duration on the lossless priority, transmit side (us per second)
    TxPauseDuration,
    /// PFC pause duration on the lossless priority, receive side (us per second)
    RxPauseDuration,
}

impl Counter {
    pub const ALL: [Counter; 6] = [
        Counter::TxBytes,
        Counter::RxBytes,
        Counter::TxPackets,
        Counter::RxPackets,
        Counter::TxPauseDuration,
        Counter::RxPauseDuration,
    ];

    /// Name of the counter in `mlnx_perf` output
    pub fn metric_name(&self) -> &'static str {
        match self {
            Counter::TxBytes => "tx_vport_rdma_unicast_bytes",
            Counter::RxBytes => "rx_vport_rdma_unicast_bytes",
            Counter::TxPackets => "tx_vport_rdma_unicast_packets",
            Counter::RxPackets => "rx_vport_rdma_unicast_packets",
            Counter::TxPauseDuration => "tx_prio3_pause_duration",
            Counter::RxPauseDuration => "rx_prio3_pause_duration",
        }
    }

    pub fn from_metric_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.metric_name() == name)
    }

    pub fn is_byte_rate(&self) -> bool {
        matches!(self, Counter::TxBytes | Counter::RxBytes)
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metric_name())
    }
}

/// Result of executing one point
///
/// A counter absent from `counters` was not measured, which is different
/// from a counter measured at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub counters: BTreeMap<Counter, f64>,
    #[serde(default)]
    pub latency: LatencyStats,
}

impl MeasurementRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counter(mut self, counter: Counter, value: f64) -> Self {
        self.counters.insert(counter, value);
        self
    }

    pub fn with_latency(mut self, latency: LatencyStats) -> Self {
        self.latency = latency;
        self
    }

    pub fn get(&self, counter: Counter) -> Option<f64> {
        self.counters.get(&counter).copied()
    }

    /// Counters the classifier needs that were not measured
    pub fn missing(&self) -> Vec<Counter> {
        Counter::ALL
            .into_iter()
            .filter(|c| !self.counters.contains_key(c))
            .collect()
    }
}

/// What happened when a trial ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    Measured {
        record: MeasurementRecord,
        classification: Classification,
    },
    Failed {
        error: String,
    },
}

/// One executed, measured and classified configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub index: u64,
    pub point: Point,
    pub outcome: TrialOutcome,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Trial {
    pub fn classification(&self) -> Option<Classification> {
        match &self.outcome {
            TrialOutcome::Measured { classification, .. } => Some(*classification),
            TrialOutcome::Failed { .. } => None,
        }
    }

    pub fn record(&self) -> Option<&MeasurementRecord> {
        match &self.outcome {
            TrialOutcome::Measured { record, .. } => Some(record),
            TrialOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, TrialOutcome::Failed { .. })
    }
}
