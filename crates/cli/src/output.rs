//! Output formatting utilities

use clap::ValueEnum;
use collie_lib::Classification;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or `json_value` as pretty JSON
pub fn print_table<T: Tabled, J: Serialize + ?Sized>(
    rows: &[T],
    json_value: &J,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                print_warning("No entries found");
                return Ok(());
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(json_value)?,
    }
    Ok(())
}

pub fn print_json<J: Serialize + ?Sized>(value: &J) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a latency value in nanoseconds
pub fn format_ns(value: Option<f64>) -> String {
    match value {
        None => "-".to_string(),
        Some(ns) if ns >= 1_000_000.0 => format!("{:.2}ms", ns / 1_000_000.0),
        Some(ns) if ns >= 1_000.0 => format!("{:.2}us", ns / 1_000.0),
        Some(ns) => format!("{:.0}ns", ns),
    }
}

/// Format a counter value, `-` when it was not measured
pub fn format_counter(value: Option<f64>) -> String {
    match value {
        Some(v) if v >= 1_000_000.0 => format!("{:.2}M", v / 1_000_000.0),
        Some(v) => format!("{:.2}", v),
        None => "-".to_string(),
    }
}

/// Format milliseconds as seconds once they exceed one second
pub fn format_duration_ms(ms: u64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

/// Color an outcome; `None` means the trial failed
pub fn color_outcome(classification: Option<Classification>) -> String {
    match classification {
        Some(Classification::NoAnomaly) => "none".green().to_string(),
        Some(Classification::PfcAnomaly) => "pfc".red().bold().to_string(),
        Some(Classification::ThroughputAnomaly) => "throughput".yellow().to_string(),
        None => "failed".red().to_string(),
    }
}
