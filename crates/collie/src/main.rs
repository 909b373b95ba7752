//! Collie - RDMA performance anomaly search
//!
//! Drives the workload on a host pair, classifies each trial from NIC
//! counters and reduces every PFC anomaly it finds to a minimal feature set.

use std::sync::Arc;

use anyhow::Result;
use collie_lib::collector::{
    CommandExecutor, LocalExecutor, RemoteLatencyReader, SshExecutor, WorkloadCollector,
};
use collie_lib::search::TrialRunner;
use collie_lib::{HealthRegistry, ParameterSpace, ResultLog, SearchEngine, SearchMetrics};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use crate::config::{CollieConfig, Transport};

const COLLIE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = COLLIE_VERSION, "Starting collie");

    let config = CollieConfig::load()?;
    let seed = config.seed.unwrap_or_else(rand::random);
    info!(
        iters = config.iters,
        seed = seed,
        hosts = config.hosts.len(),
        log_dir = %config.log_dir.display(),
        "Search configured"
    );

    let executor: Arc<dyn CommandExecutor> = match config.transport {
        Transport::Ssh => Arc::new(
            config
                .ssh_options
                .iter()
                .fold(SshExecutor::new(), |ssh, option| ssh.with_option(option.as_str())),
        ),
        Transport::Local => Arc::new(LocalExecutor),
    };

    let collector = Arc::new(WorkloadCollector::new(
        executor.clone(),
        config.workload_config(),
    ));
    let latency = Arc::new(RemoteLatencyReader::new(
        executor,
        config.latency_file.clone(),
    ));
    let runner = TrialRunner::new(
        collector,
        latency,
        config.hosts(),
        config.thresholds(),
        config.trial_timeout(),
    );

    let space = ParameterSpace::new(config.space.clone())?;
    let result_log = ResultLog::open(config.log_dir.clone())?;
    let health_registry = HealthRegistry::new();
    let metrics = SearchMetrics::new();

    if let Some(port) = config.api_port {
        let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, app_state).await {
                warn!(error = %e, "API server stopped");
            }
        });
    }

    let engine = SearchEngine::builder()
        .space(space)
        .runner(runner)
        .result_log(result_log)
        .health(health_registry)
        .config(config.search_config(seed))
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, finishing the current trial");
            let _ = shutdown_tx.send(());
        }
    });

    let report = engine.run_until(shutdown_rx).await;
    info!(
        run_id = %report.context.run_id,
        attempted = report.context.attempted,
        failed = report.context.failed,
        mfs_found = report.mfs.len(),
        interrupted = report.interrupted,
        "Search finished"
    );
    for mfs in &report.mfs {
        info!(mfs = %mfs, "Minimal feature set");
    }

    Ok(())
}
