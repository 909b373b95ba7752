//! Trial listing and inspection

use anyhow::Result;
use collie_lib::{Counter, ResultReader, Trial, TrialOutcome};
use colored::Colorize;
use tabled::Tabled;

use crate::output::{
    color_outcome, format_counter, format_duration_ms, format_ns, print_info, print_json,
    print_table, OutputFormat,
};

/// Row for the trials table
#[derive(Tabled)]
struct TrialRow {
    #[tabled(rename = "Index")]
    index: u64,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Point")]
    point: String,
    #[tabled(rename = "TX Pause")]
    tx_pause: String,
    #[tabled(rename = "RX Pause")]
    rx_pause: String,
    #[tabled(rename = "p99")]
    p99: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

impl From<&Trial> for TrialRow {
    fn from(trial: &Trial) -> Self {
        let counter = |c| trial.record().and_then(|r| r.get(c));
        Self {
            index: trial.index,
            outcome: color_outcome(trial.classification()),
            point: trial.point.to_string(),
            tx_pause: format_counter(counter(Counter::TxPauseDuration)),
            rx_pause: format_counter(counter(Counter::RxPauseDuration)),
            p99: format_ns(trial.record().and_then(|r| r.latency.p99_ns)),
            duration: format_duration_ms(trial.duration_ms),
        }
    }
}

/// List trials, optionally only the anomalous ones
pub fn list_trials(reader: &ResultReader, anomalies_only: bool, format: OutputFormat) -> Result<()> {
    let trials: Vec<Trial> = reader
        .load_trials()?
        .into_iter()
        .filter(|t| !anomalies_only || t.classification().is_some_and(|c| c.is_anomaly()))
        .collect();

    let rows: Vec<TrialRow> = trials.iter().map(TrialRow::from).collect();
    print_table(&rows, &trials, format)?;

    if matches!(format, OutputFormat::Table) && !rows.is_empty() {
        println!();
        print_info(&format!("{} trial(s)", rows.len()));
    }
    Ok(())
}

/// Show one trial record in full
pub fn show_trial(reader: &ResultReader, index: u64, format: OutputFormat) -> Result<()> {
    let trial = reader.load_trial(index)?;

    match format {
        OutputFormat::Json => print_json(&trial)?,
        OutputFormat::Table => {
            println!("{}", format!("Trial {}", trial.index).bold());
            println!("{}", "=".repeat(50));
            println!("Outcome:     {}", color_outcome(trial.classification()));
            println!("Point:       {}", trial.point.to_string().cyan());
            println!("Timestamp:   {}", trial.timestamp.to_rfc3339());
            println!("Duration:    {}", format_duration_ms(trial.duration_ms));
            println!();

            match &trial.outcome {
                TrialOutcome::Failed { error } => {
                    println!("{} {}", "Error:".red().bold(), error);
                }
                TrialOutcome::Measured { record, .. } => {
                    println!("{}", "Counters".bold());
                    println!("{}", "-".repeat(50));
                    for counter in Counter::ALL {
                        println!(
                            "{:<22} {}",
                            counter.metric_name(),
                            format_counter(record.get(counter))
                        );
                    }
                    println!();

                    println!("{}", "Latency".bold());
                    println!("{}", "-".repeat(50));
                    let latency = &record.latency;
                    println!("{:<22} {}", "samples", latency.samples);
                    println!("{:<22} {}", "min", format_ns(latency.min_ns));
                    println!("{:<22} {}", "avg", format_ns(latency.avg_ns));
                    println!("{:<22} {}", "median", format_ns(latency.median_ns));
                    println!("{:<22} {}", "p95", format_ns(latency.p95_ns));
                    println!("{:<22} {}", "p99", format_ns(latency.p99_ns));
                    println!("{:<22} {}", "max", format_ns(latency.max_ns));
                }
            }
        }
    }
    Ok(())
}
