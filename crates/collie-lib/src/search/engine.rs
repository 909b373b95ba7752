//! The search loop
//!
//! Proposes points, runs them one at a time through the trial pipeline,
//! persists every trial and reduces each new PFC anomaly to a minimal
//! feature set. The loop stops after exactly `iters` trial attempts, or
//! earlier between trials when shutdown is requested.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::mfs::{MfsReducer, MfsResult};
use super::strategy::{build_strategy, severity, AnnealingConfig, StrategyKind};
use super::{RunContext, TrialRunner};
use crate::anomaly::Classification;
use crate::error::ConfigurationError;
use crate::health::{components, HealthRegistry, SearchProgress};
use crate::models::{Trial, TrialOutcome};
use crate::observability::{SearchMetrics, StructuredLogger};
use crate::results::ResultLog;
use crate::space::{ParameterSpace, Point};

/// Run-level search settings
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Total trial attempts, failures included (MFS reruns are extra)
    pub iters: u64,
    pub seed: u64,
    pub strategy: StrategyKind,
    pub annealing: AnnealingConfig,
    /// Skip reduction for anomalies already covered by a found MFS
    pub skip_covered_mfs: bool,
    /// Consecutive failed trials before the collector is reported degraded
    pub degraded_after_failures: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            iters: 100,
            seed: 0,
            strategy: StrategyKind::default(),
            annealing: AnnealingConfig::default(),
            skip_covered_mfs: false,
            degraded_after_failures: 5,
        }
    }
}

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub context: RunContext,
    pub mfs: Vec<MfsResult>,
    pub interrupted: bool,
}

pub struct SearchEngine {
    space: ParameterSpace,
    runner: TrialRunner,
    log: ResultLog,
    health: HealthRegistry,
    config: SearchConfig,
    metrics: SearchMetrics,
}

impl SearchEngine {
    pub fn builder() -> SearchEngineBuilder {
        SearchEngineBuilder::new()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run the whole budget
    pub async fn run(self) -> SearchReport {
        // Keep the sender alive so the receiver never reports closure
        let (_tx, rx) = broadcast::channel(1);
        self.run_until(rx).await
    }

    /// Run until the budget is spent or a shutdown message arrives
    ///
    /// Shutdown is honoured between trials only; a trial in flight always
    /// completes.
    pub async fn run_until(self, mut shutdown: broadcast::Receiver<()>) -> SearchReport {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut strategy = build_strategy(self.config.strategy, self.config.annealing);
        let mut ctx = RunContext::new(strategy.name(), self.config.seed, self.config.iters);
        let logger = StructuredLogger::new(ctx.run_id.clone());
        let mut found: Vec<MfsResult> = Vec::new();
        let mut interrupted = false;

        for name in [components::COLLECTOR, components::SEARCH, components::RESULT_LOG] {
            self.health.register(name).await;
        }
        self.health.set_ready(true).await;
        logger.log_search_started(&ctx, self.runner.hosts().len());

        while ctx.attempted < self.config.iters {
            if shutdown_requested(&mut shutdown) {
                info!(attempted = ctx.attempted, "Shutdown requested, stopping search");
                interrupted = true;
                break;
            }

            let point = strategy.propose(&self.space, &mut rng);
            let trial = self.run_trial(&mut ctx, point, &logger).await;

            let score = trial.record().zip(trial.classification()).map(|(record, class)| {
                severity(
                    class,
                    record,
                    self.runner.bars(),
                    self.config.annealing.measurement_weight,
                )
            });
            logger.log_trial(&trial, score);
            if let Some(score) = score {
                self.metrics.set_severity(score);
            }

            let decision = strategy.observe(&point, score, &mut rng);
            debug!(index = trial.index, decision = ?decision, "Strategy updated");
            if let Some(temperature) = strategy.temperature() {
                self.metrics.set_temperature(temperature);
            }

            if trial.classification() == Some(Classification::PfcAnomaly) {
                self.diagnose(&mut ctx, &trial, &mut found, &logger).await;
            }

            self.update_collector_health(&ctx).await;
            self.health.set_progress(progress(&ctx)).await;
        }

        ctx.finish();
        let reason = if interrupted { "interrupted" } else { "budget exhausted" };
        logger.log_search_finished(&ctx, reason);
        if let Err(e) = self.log.write_summary(&ctx, &found) {
            warn!(error = %e, "Failed to write run summary");
            self.health
                .set_unhealthy(components::RESULT_LOG, e.to_string())
                .await;
        }
        self.health.set_ready(false).await;

        SearchReport {
            context: ctx,
            mfs: found,
            interrupted,
        }
    }

    /// Execute, record and persist one trial
    async fn run_trial(
        &self,
        ctx: &mut RunContext,
        point: Point,
        logger: &StructuredLogger,
    ) -> Trial {
        let index = ctx.next_index();
        let timestamp = Utc::now();
        let started = Instant::now();

        let outcome = match self.runner.measure(&point).await {
            Ok((record, verdict)) => {
                if let Some(incomplete) = &verdict.incomplete {
                    logger.log_data_quality(index, &incomplete.missing, verdict.classification);
                    self.metrics.inc_missing_counters(incomplete.missing.len());
                }
                self.metrics.inc_trial(verdict.classification.label());
                TrialOutcome::Measured {
                    record,
                    classification: verdict.classification,
                }
            }
            Err(e) => {
                let error = e.to_string();
                logger.log_trial_failed(index, &point, &error);
                self.metrics.inc_trial("failed");
                TrialOutcome::Failed { error }
            }
        };

        let elapsed = started.elapsed();
        self.metrics.observe_trial_duration(elapsed.as_secs_f64());

        let trial = Trial {
            index,
            point,
            outcome,
            timestamp,
            duration_ms: duration_ms(elapsed),
        };
        ctx.record(&trial);

        if let Err(e) = self.log.append_trial(ctx, &trial) {
            warn!(index = index, error = %e, "Failed to persist trial");
            self.health
                .set_unhealthy(components::RESULT_LOG, e.to_string())
                .await;
        }
        trial
    }

    /// Reduce a PFC anomaly unless a known MFS already covers it
    async fn diagnose(
        &self,
        ctx: &mut RunContext,
        trial: &Trial,
        found: &mut Vec<MfsResult>,
        logger: &StructuredLogger,
    ) {
        let Some(record) = trial.record() else {
            return;
        };

        if self.config.skip_covered_mfs {
            if let Some(known) = found.iter().find(|m| m.covers(&trial.point)) {
                logger.log_mfs_skipped(trial.index, &known.signature);
                self.metrics.inc_mfs_skipped();
                ctx.mfs_skipped += 1;
                return;
            }
        }

        let reducer = MfsReducer::new(&self.space, &self.runner);
        let mfs = reducer.reduce(trial.index, &trial.point, record).await;

        ctx.mfs_found += 1;
        ctx.mfs_reruns += mfs.reruns;
        self.metrics.inc_mfs();
        logger.log_mfs(&mfs);

        if let Err(e) = self.log.append_mfs(ctx, &mfs) {
            warn!(origin = trial.index, error = %e, "Failed to persist MFS");
            self.health
                .set_unhealthy(components::RESULT_LOG, e.to_string())
                .await;
        }
        found.push(mfs);
    }

    async fn update_collector_health(&self, ctx: &RunContext) {
        let threshold = self.config.degraded_after_failures;
        if ctx.consecutive_failures == 0 {
            self.health.set_healthy(components::COLLECTOR).await;
        } else if threshold > 0 && ctx.consecutive_failures >= threshold {
            self.health
                .set_degraded(
                    components::COLLECTOR,
                    format!("{} consecutive trial failures", ctx.consecutive_failures),
                )
                .await;
        }
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    match shutdown.try_recv() {
        Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => true,
        Err(broadcast::error::TryRecvError::Empty)
        | Err(broadcast::error::TryRecvError::Closed) => false,
    }
}

fn progress(ctx: &RunContext) -> SearchProgress {
    SearchProgress {
        attempted: ctx.attempted,
        budget: ctx.budget,
        failed: ctx.failed,
        mfs_found: ctx.mfs_found,
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis().min(u64::MAX as u128) as u64
}

/// Builder for the search engine
pub struct SearchEngineBuilder {
    space: Option<ParameterSpace>,
    runner: Option<TrialRunner>,
    log: Option<ResultLog>,
    health: Option<HealthRegistry>,
    config: SearchConfig,
}

impl SearchEngineBuilder {
    pub fn new() -> Self {
        Self {
            space: None,
            runner: None,
            log: None,
            health: None,
            config: SearchConfig::default(),
        }
    }

    pub fn space(mut self, space: ParameterSpace) -> Self {
        self.space = Some(space);
        self
    }

    pub fn runner(mut self, runner: TrialRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn result_log(mut self, log: ResultLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Share a health registry with the API server
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn iters(mut self, iters: u64) -> Self {
        self.config.iters = iters;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn annealing(mut self, annealing: AnnealingConfig) -> Self {
        self.config.annealing = annealing;
        self
    }

    pub fn skip_covered_mfs(mut self, skip: bool) -> Self {
        self.config.skip_covered_mfs = skip;
        self
    }

    pub fn degraded_after_failures(mut self, failures: u32) -> Self {
        self.config.degraded_after_failures = failures;
        self
    }

    pub fn build(self) -> Result<SearchEngine> {
        let space = self
            .space
            .ok_or_else(|| anyhow::anyhow!("Parameter space is required"))?;
        let runner = self
            .runner
            .ok_or_else(|| anyhow::anyhow!("Trial runner is required"))?;
        let log = self
            .log
            .ok_or_else(|| anyhow::anyhow!("Result log is required"))?;

        if self.config.iters == 0 {
            return Err(ConfigurationError::ZeroIterations.into());
        }
        self.config.annealing.validate()?;
        runner.bars().validate()?;

        Ok(SearchEngine {
            space,
            runner,
            log,
            health: self.health.unwrap_or_default(),
            config: self.config,
            metrics: SearchMetrics::new(),
        })
    }
}

impl Default for SearchEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
