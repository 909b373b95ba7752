//! Collie report CLI
//!
//! Offline inspection of a search result log directory: trial listings,
//! single trial records, minimal feature sets and the run summary.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use collie_lib::ResultReader;
use commands::{mfs, summary, trials};

/// Collie report CLI
#[derive(Parser)]
#[command(name = "collie-report")]
#[command(author, version, about = "Inspect Collie search result logs", long_about = None)]
pub struct Cli {
    /// Result log directory (can also be set via COLLIE_LOG_DIR env var)
    #[arg(long, env = "COLLIE_LOG_DIR", default_value = "collie-logs")]
    pub log_dir: PathBuf,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List recorded trials
    Trials {
        /// Show only trials classified as an anomaly
        #[arg(long)]
        anomalies_only: bool,
    },

    /// Show one trial record in full
    Show {
        /// Trial index
        index: u64,
    },

    /// List minimal feature sets
    Mfs,

    /// Show run totals
    Summary,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let reader = ResultReader::new(&cli.log_dir);

    match cli.command {
        Commands::Trials { anomalies_only } => {
            trials::list_trials(&reader, anomalies_only, cli.format)?;
        }
        Commands::Show { index } => {
            trials::show_trial(&reader, index, cli.format)?;
        }
        Commands::Mfs => {
            mfs::list_mfs(&reader, cli.format)?;
        }
        Commands::Summary => {
            summary::show_summary(&reader, cli.format)?;
        }
    }

    Ok(())
}
