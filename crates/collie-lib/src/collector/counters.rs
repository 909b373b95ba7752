//! NIC counter parsing
//!
//! Reads the per-second rates printed by `mlnx_perf`:
//! - byte counters: the Mbps figure (second-last token), reported in Gbps
//! - packet and pause counters: the last token

use std::collections::BTreeMap;

use tracing::debug;

use crate::models::Counter;

/// Command that samples counters on an interface for one second
pub fn counter_command(interface: &str) -> String {
    format!("mlnx_perf -i {} -c 1", interface)
}

/// Parse `mlnx_perf` output into the counters the classifier needs
///
/// Counters that do not appear, or whose value cannot be parsed, are left
/// out of the result rather than defaulted.
pub fn parse_counters(output: &str) -> BTreeMap<Counter, f64> {
    let mut counters = BTreeMap::new();

    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(name) = tokens.first() else {
            continue;
        };
        let Some(counter) = Counter::from_metric_name(name.trim_end_matches(':')) else {
            continue;
        };

        let raw = if counter.is_byte_rate() {
            tokens.len().checked_sub(2).and_then(|i| tokens.get(i))
        } else {
            tokens.last()
        };

        match raw.and_then(|r| parse_number(r)) {
            Some(value) if counter.is_byte_rate() => {
                counters.insert(counter, value / 1000.0);
            }
            Some(value) => {
                counters.insert(counter, value);
            }
            None => debug!(counter = %counter, line = %line, "Unparsable counter line"),
        }
    }

    counters
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}
