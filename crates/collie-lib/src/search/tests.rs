//! Integration tests for the search loop and MFS reduction
//!
//! A mock collector answers each point with a scripted measurement so the
//! engine can run end to end without hosts.

#[cfg(test)]
mod mock_collector_tests {
    use crate::anomaly::{classify, Classification, Thresholds};
    use crate::collector::{LatencyStats, MeasurementCollector, SnapshotChannel};
    use crate::error::ExecutionFailure;
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::{Counter, Host, MeasurementRecord};
    use crate::results::{ResultLog, ResultReader};
    use crate::search::{
        MfsReducer, SearchEngine, StepOutcome, StrategyKind, TrialRunner,
    };
    use crate::space::{Field, Opcode, ParameterSpace, Point, PointDraft, QpType, SpaceConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    type Behavior = dyn Fn(&Point, usize) -> Result<MeasurementRecord, ExecutionFailure> + Send + Sync;

    /// Collector that answers from a closure and records what it ran
    struct MockCollector {
        behavior: Box<Behavior>,
        executed: Mutex<Vec<Point>>,
        cleanups: AtomicUsize,
        delay: Duration,
    }

    impl MockCollector {
        fn new(
            behavior: impl Fn(&Point, usize) -> Result<MeasurementRecord, ExecutionFailure>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            Self {
                behavior: Box::new(behavior),
                executed: Mutex::new(Vec::new()),
                cleanups: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn executed(&self) -> Vec<Point> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MeasurementCollector for MockCollector {
        async fn cleanup(&self, _hosts: &[Host]) -> Result<(), ExecutionFailure> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(
            &self,
            point: &Point,
            _hosts: &[Host],
        ) -> Result<MeasurementRecord, ExecutionFailure> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let call = {
                let mut executed = self.executed.lock().unwrap();
                executed.push(*point);
                executed.len() - 1
            };
            (self.behavior)(point, call)
        }
    }

    fn bars() -> Thresholds {
        Thresholds::new(0.0, 0.0, 90.0, 4_000_000.0)
    }

    fn hosts() -> Vec<Host> {
        vec![Host::new("left", "10.0.0.1"), Host::new("right", "10.0.0.2")]
    }

    fn record(rx_pause: f64, gbps: f64) -> MeasurementRecord {
        MeasurementRecord::new()
            .with_counter(Counter::TxBytes, gbps)
            .with_counter(Counter::RxBytes, gbps)
            .with_counter(Counter::TxPackets, 5_000_000.0)
            .with_counter(Counter::RxPackets, 5_000_000.0)
            .with_counter(Counter::TxPauseDuration, 0.0)
            .with_counter(Counter::RxPauseDuration, rx_pause)
    }

    fn pfc() -> MeasurementRecord {
        record(120.0, 60.0)
    }

    fn clean() -> MeasurementRecord {
        record(0.0, 95.0)
    }

    fn runner(collector: Arc<MockCollector>) -> TrialRunner {
        runner_with_latency(collector, Arc::new(SnapshotChannel::new(&hosts())))
    }

    fn runner_with_latency(
        collector: Arc<MockCollector>,
        latency: Arc<SnapshotChannel>,
    ) -> TrialRunner {
        TrialRunner::new(collector, latency, hosts(), bars(), Duration::from_secs(5))
    }

    fn space() -> ParameterSpace {
        ParameterSpace::new(SpaceConfig::default()).unwrap()
    }

    fn engine(collector: Arc<MockCollector>, dir: &TempDir) -> crate::search::SearchEngineBuilder {
        SearchEngine::builder()
            .space(space())
            .runner(runner(collector))
            .result_log(ResultLog::open(dir.path()).unwrap())
            .seed(42)
    }

    #[tokio::test]
    async fn test_exactly_n_attempts_including_failures() {
        let dir = TempDir::new().unwrap();
        let collector = Arc::new(MockCollector::new(|_, call| {
            if call % 2 == 0 {
                Err(ExecutionFailure::Setup {
                    host: "left".to_string(),
                    reason: "workload exited".to_string(),
                })
            } else {
                Ok(clean())
            }
        }));

        let report = engine(collector.clone(), &dir)
            .iters(10)
            .strategy(StrategyKind::Random)
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.context.attempted, 10);
        assert_eq!(report.context.failed, 5);
        assert_eq!(report.context.count(Classification::NoAnomaly), 5);
        assert!(!report.interrupted);
        assert_eq!(collector.executed().len(), 10);
        assert_eq!(collector.cleanups.load(Ordering::SeqCst), 10);

        let reader = ResultReader::new(dir.path());
        let trials = reader.load_trials().unwrap();
        assert_eq!(trials.len(), 10);
        assert_eq!(trials.iter().filter(|t| t.is_failed()).count(), 5);
        assert!(reader.load_summary().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mfs_reduces_to_triggering_field() {
        // Anomaly appears whenever many queue pairs are active
        let collector = Arc::new(MockCollector::new(|point, _| {
            Ok(if point.num_qp() >= 64 { pfc() } else { clean() })
        }));
        let runner = runner(collector.clone());
        let space = space();

        let origin = PointDraft {
            qp_type: QpType::Uc,
            message_size: 8192,
            num_qp: 128,
            burst_size: 16,
            ..Default::default()
        }
        .validate()
        .unwrap();

        let mfs = MfsReducer::new(&space, &runner)
            .reduce(3, &origin, &pfc())
            .await;

        assert_eq!(mfs.origin_index, 3);
        assert_eq!(mfs.remaining, vec![Field::NumQp]);
        assert_eq!(mfs.point.num_qp(), 128);
        assert_eq!(
            mfs.dropped,
            vec![Field::QpType, Field::MessageSize, Field::BurstSize]
        );
        assert_eq!(mfs.reruns, 4);
        assert!(mfs.remaining.len() <= origin.non_default_fields().len());
        assert_eq!(classify(&mfs.record, &bars()), Classification::PfcAnomaly);
        assert!(mfs.covers(&origin));
        assert!(!mfs.covers(&Point::baseline()));
    }

    #[tokio::test]
    async fn test_mfs_never_executes_invalid_projection() {
        // Reproduces only on UD
        let collector = Arc::new(MockCollector::new(|point, _| {
            Ok(if point.qp_type() == QpType::Ud { pfc() } else { clean() })
        }));
        let runner = runner(collector.clone());
        let space = space();

        let origin = PointDraft {
            qp_type: QpType::Ud,
            opcode: Opcode::Send,
            mtu: 4096,
            message_size: 2048,
            ..Default::default()
        }
        .validate()
        .unwrap();

        let mfs = MfsReducer::new(&space, &runner)
            .reduce(0, &origin, &pfc())
            .await;

        let steps: Vec<(Field, &StepOutcome)> =
            mfs.steps.iter().map(|s| (s.field, &s.outcome)).collect();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].0, Field::QpType);
        assert!(matches!(steps[0].1, StepOutcome::NotReproduced { .. }));
        assert!(matches!(steps[1].1, StepOutcome::Invalid { .. }));
        assert!(matches!(steps[2].1, StepOutcome::Invalid { .. }));
        assert_eq!(steps[3], (Field::MessageSize, &StepOutcome::Reproduced));

        let executed = collector.executed();
        assert_eq!(executed.len(), 2);
        assert_eq!(mfs.reruns, 2);
        assert!(executed.iter().all(|p| p.draft().validate().is_ok()));
        assert!(executed.iter().all(|p| p.opcode() == Opcode::Send));
        assert_eq!(mfs.remaining, vec![Field::QpType, Field::Opcode, Field::Mtu]);
    }

    #[tokio::test]
    async fn test_mfs_failed_rerun_restores_field() {
        let collector = Arc::new(MockCollector::new(|_, call| {
            if call == 0 {
                Err(ExecutionFailure::Timeout(Duration::from_secs(1)))
            } else {
                Ok(pfc())
            }
        }));
        let runner = runner(collector.clone());
        let space = space();
        let origin = PointDraft {
            num_qp: 8,
            burst_size: 4,
            ..Default::default()
        }
        .validate()
        .unwrap();

        let mfs = MfsReducer::new(&space, &runner)
            .reduce(0, &origin, &pfc())
            .await;

        assert!(matches!(mfs.steps[0].outcome, StepOutcome::Failed { .. }));
        assert_eq!(mfs.remaining, vec![Field::NumQp]);
        assert_eq!(mfs.dropped, vec![Field::BurstSize]);
    }

    #[tokio::test]
    async fn test_every_pfc_anomaly_gets_an_mfs() {
        let dir = TempDir::new().unwrap();
        let collector = Arc::new(MockCollector::new(|_, _| Ok(pfc())));

        let report = engine(collector.clone(), &dir)
            .iters(6)
            .strategy(StrategyKind::Annealing)
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.context.attempted, 6);
        assert_eq!(report.context.mfs_found, 6);
        assert_eq!(report.mfs.len(), 6);
        // Always reproducing, so every field resets back to baseline
        assert!(report.mfs.iter().all(|m| m.remaining.is_empty()));

        let reruns: u64 = report.mfs.iter().map(|m| m.reruns).sum();
        assert_eq!(report.context.mfs_reruns, reruns);
        assert_eq!(collector.executed().len() as u64, 6 + reruns);

        let reader = ResultReader::new(dir.path());
        assert_eq!(reader.load_trials().unwrap().len(), 6);
        assert_eq!(reader.load_mfs().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_covered_anomalies_are_skipped() {
        let dir = TempDir::new().unwrap();
        let collector = Arc::new(MockCollector::new(|_, _| Ok(pfc())));

        let report = engine(collector, &dir)
            .iters(5)
            .strategy(StrategyKind::Random)
            .skip_covered_mfs(true)
            .build()
            .unwrap()
            .run()
            .await;

        // The first MFS is the baseline, which covers every later point
        assert_eq!(report.context.mfs_found, 1);
        assert_eq!(report.context.mfs_skipped, 4);
    }

    #[tokio::test]
    async fn test_same_seed_proposes_same_points() {
        let mut runs = Vec::new();
        for _ in 0..2 {
            let dir = TempDir::new().unwrap();
            let collector = Arc::new(MockCollector::new(|point, _| {
                Ok(if point.burst_size() > 128 { record(0.0, 10.0) } else { clean() })
            }));
            engine(collector.clone(), &dir)
                .iters(8)
                .build()
                .unwrap()
                .run()
                .await;
            runs.push(collector.executed());
        }
        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test]
    async fn test_collector_degraded_after_consecutive_failures() {
        let dir = TempDir::new().unwrap();
        let health = HealthRegistry::new();
        let collector = Arc::new(MockCollector::new(|_, _| {
            Err(ExecutionFailure::Transport {
                host: "right".to_string(),
                reason: "connection reset".to_string(),
            })
        }));

        let report = engine(collector, &dir)
            .iters(4)
            .degraded_after_failures(3)
            .health(health.clone())
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.context.failed, 4);
        assert_eq!(
            health.status(components::COLLECTOR).await,
            Some(ComponentStatus::Degraded)
        );
        assert!(!health.readiness().await.ready);
        assert_eq!(health.health().await.progress.attempted, 4);
    }

    #[tokio::test]
    async fn test_shutdown_between_trials() {
        let dir = TempDir::new().unwrap();
        let collector = Arc::new(MockCollector::new(|_, _| Ok(clean())));
        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        let report = engine(collector.clone(), &dir)
            .iters(10)
            .build()
            .unwrap()
            .run_until(rx)
            .await;

        assert!(report.interrupted);
        assert_eq!(report.context.attempted, 0);
        assert!(collector.executed().is_empty());
    }

    #[tokio::test]
    async fn test_trial_timeout_is_execution_failure() {
        let collector = Arc::new(MockCollector {
            delay: Duration::from_secs(5),
            ..MockCollector::new(|_, _| Ok(clean()))
        });
        let runner = TrialRunner::new(
            collector,
            Arc::new(SnapshotChannel::new(&hosts())),
            hosts(),
            bars(),
            Duration::from_millis(20),
        );

        let result = runner.measure(&Point::baseline()).await;
        assert!(matches!(result, Err(ExecutionFailure::Timeout(_))));
    }

    #[tokio::test]
    async fn test_runner_attaches_latency_once() {
        let latency = Arc::new(SnapshotChannel::new(&hosts()));
        let collector = Arc::new(MockCollector::new(|_, _| Ok(clean())));
        let runner = runner_with_latency(collector, latency.clone());

        latency
            .publish(
                "left",
                LatencyStats {
                    samples: 10,
                    min_ns: Some(100.0),
                    max_ns: Some(500.0),
                    ..Default::default()
                },
            )
            .unwrap();
        latency
            .publish(
                "right",
                LatencyStats {
                    samples: 20,
                    min_ns: Some(50.0),
                    max_ns: Some(900.0),
                    ..Default::default()
                },
            )
            .unwrap();

        let (first, verdict) = runner.measure(&Point::baseline()).await.unwrap();
        assert_eq!(verdict.classification, Classification::NoAnomaly);
        assert!(verdict.incomplete.is_none());
        assert_eq!(first.latency.samples, 30);
        assert_eq!(first.latency.min_ns, Some(50.0));
        assert_eq!(first.latency.max_ns, Some(900.0));

        let (second, _) = runner.measure(&Point::baseline()).await.unwrap();
        assert!(second.latency.is_empty());
    }

    #[tokio::test]
    async fn test_build_requires_collaborators() {
        assert!(SearchEngine::builder().build().is_err());

        let dir = TempDir::new().unwrap();
        let collector = Arc::new(MockCollector::new(|_, _| Ok(clean())));
        assert!(engine(collector, &dir).iters(0).build().is_err());
    }
}
