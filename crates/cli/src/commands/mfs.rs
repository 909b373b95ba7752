//! Minimal feature set listing

use anyhow::Result;
use collie_lib::search::StepOutcome;
use collie_lib::{MfsResult, ResultReader};
use colored::Colorize;
use tabled::Tabled;

use crate::output::{print_table, OutputFormat};

/// Row for the MFS table
#[derive(Tabled)]
struct MfsRow {
    #[tabled(rename = "Origin")]
    origin: u64,
    #[tabled(rename = "Signature")]
    signature: String,
    #[tabled(rename = "Features")]
    features: String,
    #[tabled(rename = "Dropped")]
    dropped: usize,
    #[tabled(rename = "Invalid")]
    invalid: usize,
    #[tabled(rename = "Reruns")]
    reruns: u64,
    #[tabled(rename = "Reduced Point")]
    point: String,
}

impl From<&MfsResult> for MfsRow {
    fn from(mfs: &MfsResult) -> Self {
        let features = if mfs.remaining.is_empty() {
            "(baseline)".to_string()
        } else {
            mfs.remaining
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        Self {
            origin: mfs.origin_index,
            signature: mfs.signature.cyan().to_string(),
            features,
            dropped: mfs.dropped.len(),
            invalid: mfs
                .steps
                .iter()
                .filter(|s| matches!(s.outcome, StepOutcome::Invalid { .. }))
                .count(),
            reruns: mfs.reruns,
            point: mfs.point.to_string(),
        }
    }
}

/// List every minimal feature set in the log
pub fn list_mfs(reader: &ResultReader, format: OutputFormat) -> Result<()> {
    let results = reader.load_mfs()?;
    let rows: Vec<MfsRow> = results.iter().map(MfsRow::from).collect();
    print_table(&rows, &results, format)
}
