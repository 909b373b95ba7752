//! Durable, append-only record of a search run
//!
//! Layout under the log directory:
//! - `trials/<index:06>.log`: one plain-text record per trial
//! - `mfs/<origin:06>-<signature>.json`: one artifact per minimal feature set
//! - `summary.json`: run tallies, written when the search finishes
//!
//! Every file is created with create-new semantics, so nothing already
//! persisted is ever overwritten.

mod format;

pub use format::{parse_trial, render_trial};

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Trial;
use crate::search::{MfsResult, RunContext};
use crate::space::Field;

const TRIALS_DIR: &str = "trials";
const MFS_DIR: &str = "mfs";
const SUMMARY_FILE: &str = "summary.json";

/// One line of the summary per minimal feature set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfsEntry {
    pub origin_index: u64,
    pub signature: String,
    pub remaining: Vec<Field>,
    pub reruns: u64,
}

impl From<&MfsResult> for MfsEntry {
    fn from(mfs: &MfsResult) -> Self {
        Self {
            origin_index: mfs.origin_index,
            signature: mfs.signature.clone(),
            remaining: mfs.remaining.clone(),
            reruns: mfs.reruns,
        }
    }
}

/// Contents of `summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(flatten)]
    pub context: RunContext,
    pub mfs: Vec<MfsEntry>,
}

fn trial_file_name(index: u64) -> String {
    format!("{:06}.log", index)
}

/// Writer for one run's log directory
#[derive(Debug, Clone)]
pub struct ResultLog {
    root: PathBuf,
}

impl ResultLog {
    /// Prepare the directory layout
    ///
    /// Fails when the directory already holds trial records from another
    /// run, since they could not be written again without overwriting.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [TRIALS_DIR, MFS_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create directory {:?}", path))?;
        }

        let trials = root.join(TRIALS_DIR);
        let existing = fs::read_dir(&trials)
            .with_context(|| format!("Failed to list {:?}", trials))?
            .next()
            .is_some();
        if existing {
            anyhow::bail!("{:?} already holds trial records from an earlier run", trials);
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trial_path(&self, index: u64) -> PathBuf {
        self.root.join(TRIALS_DIR).join(trial_file_name(index))
    }

    pub fn append_trial(&self, ctx: &RunContext, trial: &Trial) -> Result<PathBuf> {
        let path = self.trial_path(trial.index);
        write_new(&path, render_trial(&ctx.run_id, trial).as_bytes())?;
        debug!(path = %path.display(), index = trial.index, "Trial persisted");
        Ok(path)
    }

    pub fn append_mfs(&self, ctx: &RunContext, mfs: &MfsResult) -> Result<PathBuf> {
        let path = self
            .root
            .join(MFS_DIR)
            .join(format!("{:06}-{}.json", mfs.origin_index, mfs.signature));
        let json = serde_json::to_vec_pretty(mfs).context("Failed to serialize MFS")?;
        write_new(&path, &json)?;
        debug!(path = %path.display(), run_id = %ctx.run_id, "MFS persisted");
        Ok(path)
    }

    pub fn write_summary(&self, ctx: &RunContext, mfs: &[MfsResult]) -> Result<PathBuf> {
        let path = self.root.join(SUMMARY_FILE);
        let summary = RunSummary {
            context: ctx.clone(),
            mfs: mfs.iter().map(MfsEntry::from).collect(),
        };
        let json = serde_json::to_vec_pretty(&summary).context("Failed to serialize summary")?;
        write_new(&path, &json)?;
        Ok(path)
    }
}

fn write_new(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    file.write_all(data)
        .with_context(|| format!("Failed to write {:?}", path))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {:?}", path))?;
    Ok(())
}

/// Read-only view of a log directory
#[derive(Debug, Clone)]
pub struct ResultReader {
    root: PathBuf,
}

impl ResultReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// All trials, ordered by index
    pub fn load_trials(&self) -> Result<Vec<Trial>> {
        let dir = self.root.join(TRIALS_DIR);
        let mut trials = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("Failed to list {:?}", dir))?
        {
            let path = entry?.path();
            let Some(index) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".log"))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            trials.push(self.read_trial(&path, index)?);
        }
        trials.sort_by_key(|t| t.index);
        Ok(trials)
    }

    pub fn load_trial(&self, index: u64) -> Result<Trial> {
        let path = self.root.join(TRIALS_DIR).join(trial_file_name(index));
        self.read_trial(&path, index)
    }

    fn read_trial(&self, path: &Path, index: u64) -> Result<Trial> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        parse_trial(index, &content)
    }

    /// All MFS artifacts, ordered by originating trial
    pub fn load_mfs(&self) -> Result<Vec<MfsResult>> {
        let dir = self.root.join(MFS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("Failed to list {:?}", dir))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
            let mfs: MfsResult = serde_json::from_slice(&data)
                .with_context(|| format!("Failed to parse {:?}", path))?;
            results.push(mfs);
        }
        results.sort_by_key(|m| m.origin_index);
        Ok(results)
    }

    /// The run summary, if the run finished
    pub fn load_summary(&self) -> Result<Option<RunSummary>> {
        let path = self.root.join(SUMMARY_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
        let summary =
            serde_json::from_slice(&data).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(Some(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::Classification;
    use crate::models::{Counter, MeasurementRecord, TrialOutcome};
    use crate::search::{signature, ReductionStep, StepOutcome};
    use crate::space::{Point, PointDraft};
    use chrono::Utc;
    use tempfile::TempDir;

    fn trial(index: u64, outcome: TrialOutcome) -> Trial {
        Trial {
            index,
            point: Point::baseline(),
            outcome,
            timestamp: Utc::now(),
            duration_ms: 10,
        }
    }

    fn pfc() -> TrialOutcome {
        TrialOutcome::Measured {
            record: MeasurementRecord::new().with_counter(Counter::RxPauseDuration, 0.5),
            classification: Classification::PfcAnomaly,
        }
    }

    fn mfs(origin_index: u64) -> MfsResult {
        let point = PointDraft {
            num_qp: 128,
            ..Default::default()
        }
        .validate()
        .unwrap();
        MfsResult {
            origin_index,
            original: point,
            point,
            classification: Classification::PfcAnomaly,
            dropped: Vec::new(),
            remaining: vec![Field::NumQp],
            steps: vec![ReductionStep {
                field: Field::NumQp,
                outcome: StepOutcome::NotReproduced {
                    classification: Classification::NoAnomaly,
                },
            }],
            reruns: 1,
            record: MeasurementRecord::new(),
            signature: signature(&point),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_trials_are_written_and_read_back_in_order() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new("random", 1, 3);
        let log = ResultLog::open(dir.path()).unwrap();

        for index in [2, 0, 1] {
            let outcome = if index == 1 {
                TrialOutcome::Failed {
                    error: "timeout".to_string(),
                }
            } else {
                pfc()
            };
            log.append_trial(&ctx, &trial(index, outcome)).unwrap();
        }

        assert!(dir.path().join("trials/000001.log").exists());

        let reader = ResultReader::new(dir.path());
        let trials = reader.load_trials().unwrap();
        let indices: Vec<u64> = trials.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(trials[1].is_failed());
        assert_eq!(trials[2].classification(), Some(Classification::PfcAnomaly));
        assert_eq!(reader.load_trial(2).unwrap().index, 2);
    }

    #[test]
    fn test_existing_trial_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new("random", 1, 1);
        let log = ResultLog::open(dir.path()).unwrap();

        log.append_trial(&ctx, &trial(0, pfc())).unwrap();
        let before = std::fs::read_to_string(log.trial_path(0)).unwrap();

        let second = log.append_trial(
            &ctx,
            &trial(
                0,
                TrialOutcome::Failed {
                    error: "x".to_string(),
                },
            ),
        );
        assert!(second.is_err());
        assert_eq!(std::fs::read_to_string(log.trial_path(0)).unwrap(), before);
    }

    #[test]
    fn test_open_refuses_used_directory() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new("random", 1, 1);
        ResultLog::open(dir.path())
            .unwrap()
            .append_trial(&ctx, &trial(0, pfc()))
            .unwrap();

        assert!(ResultLog::open(dir.path()).is_err());
    }

    #[test]
    fn test_mfs_and_summary() {
        let dir = TempDir::new().unwrap();
        let mut ctx = RunContext::new("annealing", 9, 5);
        let log = ResultLog::open(dir.path()).unwrap();

        let found = vec![mfs(4), mfs(1)];
        for m in &found {
            let path = log.append_mfs(&ctx, m).unwrap();
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            assert!(name.ends_with(&format!("-{}.json", m.signature)));
        }
        ctx.mfs_found = 2;
        ctx.finish();
        log.write_summary(&ctx, &found).unwrap();

        let reader = ResultReader::new(dir.path());
        let loaded = reader.load_mfs().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].origin_index, 1);
        assert_eq!(loaded[1], found[0]);

        let summary = reader.load_summary().unwrap().unwrap();
        assert_eq!(summary.context.seed, 9);
        assert_eq!(summary.context.mfs_found, 2);
        assert_eq!(summary.mfs[0].remaining, vec![Field::NumQp]);
    }

    #[test]
    fn test_reader_on_unfinished_run() {
        let dir = TempDir::new().unwrap();
        ResultLog::open(dir.path()).unwrap();
        let reader = ResultReader::new(dir.path());

        assert!(reader.load_trials().unwrap().is_empty());
        assert!(reader.load_mfs().unwrap().is_empty());
        assert!(reader.load_summary().unwrap().is_none());
    }
}
