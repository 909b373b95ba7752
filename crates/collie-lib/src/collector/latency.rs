//! Latency snapshots and cross-host aggregation
//!
//! Every host keeps a rolling window of hardware-timestamped latency
//! samples and overwrites a small `key: value` snapshot file after each
//! batch. The core only ever sees these pre-aggregated per-host
//! statistics, never raw samples.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::CommandExecutor;
use crate::error::CollectionFailure;
use crate::models::Host;

/// Default snapshot location written by the workload on every host
pub const DEFAULT_LATENCY_FILE: &str = "/tmp/collie_hw_latency_stats.txt";

pub const KEY_SAMPLES: &str = "latency_samples";
pub const KEY_MIN: &str = "latency_min_ns";
pub const KEY_AVG: &str = "latency_avg_ns";
pub const KEY_MEDIAN: &str = "latency_median_ns";
pub const KEY_P95: &str = "latency_p95_ns";
pub const KEY_P99: &str = "latency_p99_ns";
pub const KEY_MAX: &str = "latency_max_ns";

/// Latency statistics in nanoseconds, per host or combined
///
/// When `samples` is zero every statistic is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ns: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_ns: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_ns: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p95_ns: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p99_ns: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ns: Option<f64>,
}

impl LatencyStats {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Parse a snapshot file
    ///
    /// Unknown keys are ignored. A missing or unparsable sample count
    /// yields an empty snapshot; an unparsable statistic is left absent.
    pub fn parse(content: &str) -> Self {
        let mut stats = Self::empty();
        let mut samples = None;

        for line in content.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = value.trim();
            let slot = match key.trim() {
                KEY_SAMPLES => {
                    samples = value.parse::<u64>().ok();
                    continue;
                }
                KEY_MIN => &mut stats.min_ns,
                KEY_AVG => &mut stats.avg_ns,
                KEY_MEDIAN => &mut stats.median_ns,
                KEY_P95 => &mut stats.p95_ns,
                KEY_P99 => &mut stats.p99_ns,
                KEY_MAX => &mut stats.max_ns,
                _ => continue,
            };
            *slot = value.parse::<f64>().ok().filter(|v| v.is_finite());
        }

        stats.samples = samples.unwrap_or(0);
        stats.normalized()
    }

    /// Clear every statistic when there are no samples
    pub fn normalized(self) -> Self {
        if self.samples == 0 {
            Self::empty()
        } else {
            self
        }
    }

    /// Key/value lines in snapshot order; empty when there are no samples
    pub fn to_lines(&self) -> Vec<(&'static str, String)> {
        if self.is_empty() {
            return Vec::new();
        }

        let mut lines = vec![(KEY_SAMPLES, self.samples.to_string())];
        for (key, value) in [
            (KEY_MIN, self.min_ns),
            (KEY_AVG, self.avg_ns),
            (KEY_MEDIAN, self.median_ns),
            (KEY_P95, self.p95_ns),
            (KEY_P99, self.p99_ns),
            (KEY_MAX, self.max_ns),
        ] {
            if let Some(v) = value {
                lines.push((key, v.to_string()));
            }
        }
        lines
    }
}

/// Combine per-host snapshots into one cross-host summary
///
/// Only snapshots with samples take part. Sample counts are summed, the
/// minimum is the smallest per-host minimum, and tail statistics take the
/// worst host. Average and median are means of the per-host values.
pub fn combine(snapshots: &[LatencyStats]) -> LatencyStats {
    let present: Vec<&LatencyStats> = snapshots.iter().filter(|s| !s.is_empty()).collect();
    if present.is_empty() {
        return LatencyStats::empty();
    }

    let values = |get: fn(&LatencyStats) -> Option<f64>| -> Vec<f64> {
        present.iter().filter_map(|s| get(s)).collect()
    };
    let min = |v: Vec<f64>| v.into_iter().reduce(f64::min);
    let max = |v: Vec<f64>| v.into_iter().reduce(f64::max);
    let mean = |v: Vec<f64>| {
        if v.is_empty() {
            None
        } else {
            Some(v.iter().sum::<f64>() / v.len() as f64)
        }
    };

    LatencyStats {
        samples: present.iter().map(|s| s.samples).sum(),
        min_ns: min(values(|s| s.min_ns)),
        avg_ns: mean(values(|s| s.avg_ns)),
        median_ns: mean(values(|s| s.median_ns)),
        p95_ns: max(values(|s| s.p95_ns)),
        p99_ns: max(values(|s| s.p99_ns)),
        max_ns: max(values(|s| s.max_ns)),
    }
}

/// Source of the most recent latency snapshot on a host
#[async_trait]
pub trait LatencySource: Send + Sync {
    /// Latest snapshot, or `None` when the host produced no samples
    async fn read_latest(&self, host: &Host) -> Result<Option<LatencyStats>, CollectionFailure>;
}

/// Reads every host's snapshot and combines the results
pub struct LatencyAggregator {
    source: Arc<dyn LatencySource>,
}

impl LatencyAggregator {
    pub fn new(source: Arc<dyn LatencySource>) -> Self {
        Self { source }
    }

    /// Collect from all hosts; unreachable hosts are omitted and reported
    pub async fn collect(&self, hosts: &[Host]) -> (LatencyStats, Vec<CollectionFailure>) {
        let mut snapshots = Vec::with_capacity(hosts.len());
        let mut failures = Vec::new();

        for host in hosts {
            match self.source.read_latest(host).await {
                Ok(Some(stats)) => snapshots.push(stats),
                Ok(None) => debug!(host = %host, "No latency samples on host"),
                Err(e) => {
                    warn!(host = %host, error = %e, "Omitting host from latency aggregation");
                    failures.push(e);
                }
            }
        }

        (combine(&snapshots), failures)
    }
}

/// Reads the snapshot file on each host through a command executor
pub struct RemoteLatencyReader {
    executor: Arc<dyn CommandExecutor>,
    path: String,
    timeout: Duration,
}

impl RemoteLatencyReader {
    pub fn new(executor: Arc<dyn CommandExecutor>, path: impl Into<String>) -> Self {
        Self {
            executor,
            path: path.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LatencySource for RemoteLatencyReader {
    async fn read_latest(&self, host: &Host) -> Result<Option<LatencyStats>, CollectionFailure> {
        let command = format!("cat {} 2>/dev/null || true", self.path);
        let output = self
            .executor
            .run(host, &command, self.timeout)
            .await
            .map_err(|e| CollectionFailure {
                host: host.name.clone(),
                reason: e.to_string(),
            })?;

        let stats = LatencyStats::parse(&output.stdout);
        Ok((!stats.is_empty()).then_some(stats))
    }
}

/// Per-host latest-value channel for in-process snapshot producers
///
/// Publishing overwrites any snapshot not yet read, and each snapshot is
/// handed out at most once.
pub struct SnapshotChannel {
    slots: HashMap<String, watch::Sender<Option<LatencyStats>>>,
}

impl SnapshotChannel {
    pub fn new<'a>(hosts: impl IntoIterator<Item = &'a Host>) -> Self {
        let slots = hosts
            .into_iter()
            .map(|h| (h.name.clone(), watch::channel(None).0))
            .collect();
        Self { slots }
    }

    /// Publish a snapshot for a host, replacing any unread one
    pub fn publish(&self, host: &str, stats: LatencyStats) -> Result<(), CollectionFailure> {
        let slot = self.slot(host)?;
        if slot.send_replace(Some(stats)).is_some() {
            debug!(host = %host, "Unread latency snapshot overwritten");
        }
        Ok(())
    }

    /// Watch a host's slot for new snapshots
    pub fn subscribe(&self, host: &str) -> Result<watch::Receiver<Option<LatencyStats>>, CollectionFailure> {
        Ok(self.slot(host)?.subscribe())
    }

    fn slot(&self, host: &str) -> Result<&watch::Sender<Option<LatencyStats>>, CollectionFailure> {
        self.slots.get(host).ok_or_else(|| CollectionFailure {
            host: host.to_string(),
            reason: "host has no snapshot channel".to_string(),
        })
    }
}

#[async_trait]
impl LatencySource for SnapshotChannel {
    async fn read_latest(&self, host: &Host) -> Result<Option<LatencyStats>, CollectionFailure> {
        let taken = self.slot(&host.name)?.send_replace(None);
        Ok(taken.map(LatencyStats::normalized).filter(|s| !s.is_empty()))
    }
}
