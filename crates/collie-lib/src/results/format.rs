//! Plain-text trial record
//!
//! ```text
//! {"qp_type":"RC","opcode":"WRITE",...}
//!
//! tx_vport_rdma_unicast_bytes:  19.6
//! rx_vport_rdma_unicast_bytes:  38.5
//! ...
//!
//! run: 20261018T101500Z
//! result: -2
//! anomaly: throughput anomaly
//! timestamp: 2026-10-18T10:15:07.123Z
//! duration_ms: 7012
//!
//! latency_samples: 10
//! latency_min_ns: 912
//! ...
//! ```
//!
//! Empty sections are left out. Failed trials carry `result: failed` and
//! an `error:` line instead of counters.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use crate::anomaly::Classification;
use crate::collector::LatencyStats;
use crate::models::{Counter, MeasurementRecord, Trial, TrialOutcome};
use crate::space::Point;

const FAILED: &str = "failed";

pub fn render_trial(run_id: &str, trial: &Trial) -> String {
    let mut sections = vec![trial.point.to_json()];

    let mut outcome = vec![format!("run: {}", run_id)];
    match &trial.outcome {
        TrialOutcome::Measured {
            record,
            classification,
        } => {
            let counters: Vec<String> = record
                .counters
                .iter()
                .map(|(counter, value)| format!("{}:  {}", counter.metric_name(), value))
                .collect();
            sections.push(counters.join("\n"));

            outcome.push(format!("result: {}", classification.code()));
            outcome.push(format!("anomaly: {}", classification.tag()));
            let missing = record.missing();
            if !missing.is_empty() {
                let names: Vec<&str> = missing.iter().map(|c| c.metric_name()).collect();
                outcome.push(format!("missing: {}", names.join(", ")));
            }
        }
        TrialOutcome::Failed { error } => {
            outcome.push(format!("result: {}", FAILED));
            outcome.push(format!("error: {}", error.replace('\n', " ")));
        }
    }
    outcome.push(format!("timestamp: {}", trial.timestamp.to_rfc3339()));
    outcome.push(format!("duration_ms: {}", trial.duration_ms));
    sections.push(outcome.join("\n"));

    if let Some(record) = trial.record() {
        let latency: Vec<String> = record
            .latency
            .to_lines()
            .into_iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        sections.push(latency.join("\n"));
    }

    let mut text = sections
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    text.push('\n');
    text
}

/// Parse a record written by [`render_trial`]
pub fn parse_trial(index: u64, content: &str) -> Result<Trial> {
    let mut lines = content.lines();
    let point_line = lines.next().context("empty trial record")?;
    let point: Point = serde_json::from_str(point_line.trim())
        .with_context(|| format!("trial {} has an invalid point", index))?;

    let mut counters = BTreeMap::new();
    let mut latency_lines = Vec::new();
    let mut result = None;
    let mut error = None;
    let mut timestamp = None;
    let mut duration_ms = 0;

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        if let Some(counter) = Counter::from_metric_name(key) {
            let value: f64 = value
                .parse()
                .with_context(|| format!("trial {}: bad value for {}", index, key))?;
            counters.insert(counter, value);
            continue;
        }
        if key.starts_with("latency_") {
            latency_lines.push(line);
            continue;
        }
        match key {
            "result" => result = Some(value.to_string()),
            "error" => error = Some(value.to_string()),
            "timestamp" => {
                let parsed = DateTime::parse_from_rfc3339(value)
                    .with_context(|| format!("trial {}: bad timestamp", index))?;
                timestamp = Some(parsed.with_timezone(&Utc));
            }
            "duration_ms" => {
                duration_ms = value
                    .parse()
                    .with_context(|| format!("trial {}: bad duration", index))?;
            }
            _ => {}
        }
    }

    let result = result.with_context(|| format!("trial {} has no result line", index))?;
    let outcome = if result == FAILED {
        TrialOutcome::Failed {
            error: error.unwrap_or_default(),
        }
    } else {
        let code: i32 = result
            .parse()
            .with_context(|| format!("trial {}: bad result code {:?}", index, result))?;
        let Some(classification) = Classification::from_code(code) else {
            bail!("trial {}: unknown result code {}", index, code);
        };
        TrialOutcome::Measured {
            record: MeasurementRecord {
                counters,
                latency: LatencyStats::parse(&latency_lines.join("\n")),
            },
            classification,
        }
    };

    Ok(Trial {
        index,
        point,
        outcome,
        timestamp: timestamp.with_context(|| format!("trial {} has no timestamp", index))?,
        duration_ms,
    })
}
