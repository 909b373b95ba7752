//! Run summary

use anyhow::Result;
use collie_lib::{Classification, ResultReader};
use colored::Colorize;

use crate::output::{print_json, print_warning, OutputFormat};

/// Show the totals written when the run finished
pub fn show_summary(reader: &ResultReader, format: OutputFormat) -> Result<()> {
    let Some(summary) = reader.load_summary()? else {
        print_warning("No summary.json found; the run may still be in progress");
        return Ok(());
    };

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            let ctx = &summary.context;
            println!("{}", "Run Summary".bold());
            println!("{}", "=".repeat(50));
            println!("Run:                    {}", ctx.run_id.cyan());
            println!("Strategy:               {}", ctx.strategy);
            println!("Seed:                   {}", ctx.seed);
            println!("Started:                {}", ctx.started_at.to_rfc3339());
            match ctx.finished_at {
                Some(finished) => println!("Finished:               {}", finished.to_rfc3339()),
                None => println!("Finished:               {}", "-".dimmed()),
            }
            println!();

            println!("{}", "Trials".bold());
            println!("{}", "-".repeat(50));
            println!("Attempted:              {} / {}", ctx.attempted, ctx.budget);
            println!("Failed:                 {}", ctx.failed);
            println!(
                "No anomaly:             {}",
                ctx.count(Classification::NoAnomaly)
            );
            println!(
                "PFC anomaly:            {}",
                ctx.count(Classification::PfcAnomaly).to_string().red()
            );
            println!(
                "Throughput anomaly:     {}",
                ctx.count(Classification::ThroughputAnomaly).to_string().yellow()
            );
            println!();

            println!("{}", "Minimal Feature Sets".bold());
            println!("{}", "-".repeat(50));
            println!("Found:                  {}", ctx.mfs_found);
            println!("Skipped (covered):      {}", ctx.mfs_skipped);
            println!("Reruns:                 {}", ctx.mfs_reruns);
            for entry in &summary.mfs {
                let fields: Vec<String> = entry.remaining.iter().map(|f| f.to_string()).collect();
                println!(
                    "  #{:<6} {}  [{}]",
                    entry.origin_index,
                    entry.signature.cyan(),
                    fields.join(", ")
                );
            }
        }
    }
    Ok(())
}
