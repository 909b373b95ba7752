//! Run configuration
//!
//! Read once at startup from an optional TOML file (`COLLIE_CONFIG`,
//! default `collie.toml`) overlaid with `COLLIE_*` environment variables.
//! Nested keys use `__`, e.g. `COLLIE_BARS__BPS_BAR=90`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use collie_lib::collector::{WorkloadConfig, DEFAULT_LATENCY_FILE};
use collie_lib::search::{AnnealingConfig, SearchConfig, StrategyKind};
use collie_lib::{ConfigurationError, Host, ParameterSpace, SpaceConfig, Thresholds};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "collie.toml";
const ENV_PREFIX: &str = "COLLIE";

/// Classifier bars; all four are required
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BarsConfig {
    pub tx_pfc_bar: f64,
    pub rx_pfc_bar: f64,
    pub bps_bar: f64,
    pub pps_bar: f64,
}

/// How commands reach the hosts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Ssh,
    /// Run everything through the local shell, for loopback setups
    Local,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MfsSection {
    pub skip_covered: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollieConfig {
    /// Total trial budget
    pub iters: u64,

    /// Seed for the search; random when absent
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub strategy: StrategyKind,

    pub bars: BarsConfig,

    #[serde(default)]
    pub hosts: Vec<Host>,

    /// Index of the host whose NIC counters are read
    #[serde(default)]
    pub monitor_host: usize,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_workload_path")]
    pub workload_path: String,

    #[serde(default = "default_latency_file")]
    pub latency_file: String,

    #[serde(default = "default_trial_timeout")]
    pub trial_timeout_secs: u64,

    #[serde(default = "default_settle")]
    pub settle_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default)]
    pub transport: Transport,

    /// Extra `ssh` arguments, e.g. `["-p", "2222"]`
    #[serde(default)]
    pub ssh_options: Vec<String>,

    /// Port for /healthz, /readyz and /metrics; disabled when absent
    #[serde(default)]
    pub api_port: Option<u16>,

    /// Consecutive failed trials before the collector reports degraded
    #[serde(default = "default_degraded_after")]
    pub degraded_after_failures: u32,

    #[serde(default)]
    pub annealing: AnnealingConfig,

    #[serde(default)]
    pub space: SpaceConfig,

    #[serde(default)]
    pub mfs: MfsSection,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("collie-logs")
}

fn default_workload_path() -> String {
    WorkloadConfig::default().workload_path
}

fn default_latency_file() -> String {
    DEFAULT_LATENCY_FILE.to_string()
}

fn default_trial_timeout() -> u64 {
    120
}

fn default_settle() -> u64 {
    5
}

fn default_command_timeout() -> u64 {
    30
}

fn default_degraded_after() -> u32 {
    5
}

impl CollieConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("COLLIE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_with(Path::new(&path), ENV_PREFIX)
    }

    fn load_with(path: &Path, env_prefix: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {:?}", path))?;

        let config: CollieConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::Other(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.iters == 0 {
            return Err(ConfigurationError::ZeroIterations);
        }
        self.thresholds().validate()?;

        if self.hosts.len() < 2 {
            return Err(ConfigurationError::NotEnoughHosts {
                required: 2,
                actual: self.hosts.len(),
            });
        }
        if self.monitor_host >= self.hosts.len() {
            return Err(ConfigurationError::MonitorHostOutOfRange {
                index: self.monitor_host,
                hosts: self.hosts.len(),
            });
        }
        if self.trial_timeout_secs == 0 {
            return Err(ConfigurationError::Other(
                "trial_timeout_secs must be greater than zero".to_string(),
            ));
        }

        self.annealing.validate()?;
        ParameterSpace::new(self.space.clone())?;
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(
            self.bars.tx_pfc_bar,
            self.bars.rx_pfc_bar,
            self.bars.bps_bar,
            self.bars.pps_bar,
        )
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.hosts.clone()
    }

    pub fn trial_timeout(&self) -> Duration {
        Duration::from_secs(self.trial_timeout_secs)
    }

    pub fn workload_config(&self) -> WorkloadConfig {
        WorkloadConfig {
            workload_path: self.workload_path.clone(),
            monitor_host: self.monitor_host,
            settle: Duration::from_secs(self.settle_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }

    pub fn search_config(&self, seed: u64) -> SearchConfig {
        SearchConfig {
            iters: self.iters,
            seed,
            strategy: self.strategy,
            annealing: self.annealing,
            skip_covered_mfs: self.mfs.skip_covered,
            degraded_after_failures: self.degraded_after_failures,
        }
    }
}
