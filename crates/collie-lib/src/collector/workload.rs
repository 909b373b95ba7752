//! Traffic workload driver
//!
//! Launches the external traffic generator on both hosts for one point,
//! waits for traffic to settle, then samples NIC counters on the monitor
//! host.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::counters::{counter_command, parse_counters};
use super::{CommandExecutor, MeasurementCollector};
use crate::error::ExecutionFailure;
use crate::models::{Host, MeasurementRecord};
use crate::space::{Direction, Point};

/// Role a workload process plays on a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Waits for connections and posts receives
    Server,
    /// Connects to the peer and drives traffic
    Client,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

/// Configuration for the workload collector
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Path of the traffic generator on every host
    pub workload_path: String,
    /// Index of the host whose NIC counters are sampled
    pub monitor_host: usize,
    /// Wait after launch before sampling counters
    pub settle: Duration,
    /// Bound on each individual remote command
    pub command_timeout: Duration,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            workload_path: "/usr/local/bin/collie_engine".to_string(),
            monitor_host: 0,
            settle: Duration::from_secs(5),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Render the command line for one workload process
pub fn workload_command(path: &str, point: &Point, role: Role, local: &Host, peer: &Host) -> String {
    let mut args = vec![
        path.to_string(),
        format!("--role={}", role.as_str()),
        format!("--dev={}", local.interface),
        format!("--qp-type={}", point.qp_type()),
        format!("--opcode={}", point.opcode()),
        format!("--mtu={}", point.mtu()),
        format!("--size={}", point.message_size()),
        format!("--num-qp={}", point.num_qp()),
        format!("--send-batch={}", point.send_batch()),
        format!("--recv-batch={}", point.recv_batch()),
        format!("--burst={}", point.burst_size()),
        format!("--sge={}", point.num_sge()),
    ];
    if role == Role::Client {
        args.push(format!("--peer={}", peer.address));
    }
    args.join(" ")
}

/// Quoted `pgrep -f`/`pkill -f` pattern for the workload path
///
/// The first path character is wrapped in a bracket expression so the
/// pattern never matches the shell whose command line carries it. Other
/// regex metacharacters are escaped.
pub fn process_pattern(path: &str) -> String {
    let mut pattern = String::with_capacity(path.len() + 4);
    let mut bracketed = false;
    for c in path.chars() {
        if !bracketed && (c.is_ascii_alphanumeric() || c == '/' || c == '_') {
            pattern.push('[');
            pattern.push(c);
            pattern.push(']');
            bracketed = true;
        } else if ".^$*+?()[]{}|\\".contains(c) {
            pattern.push('\\');
            pattern.push(c);
        } else {
            pattern.push(c);
        }
    }
    format!("'{}'", pattern.replace('\'', "'\\''"))
}

/// Collector that drives the external traffic generator
pub struct WorkloadCollector {
    executor: Arc<dyn CommandExecutor>,
    config: WorkloadConfig,
}

impl WorkloadCollector {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: WorkloadConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// (host index, role, peer index) for every process of a point
    fn launch_plan(point: &Point) -> Vec<(usize, Role, usize)> {
        let initiator = point.initiator().host_index();
        let responder = 1 - initiator;

        let mut plan = vec![(responder, Role::Server, initiator)];
        if point.direction() == Direction::Bidirectional {
            plan.push((initiator, Role::Server, responder));
        }
        plan.push((initiator, Role::Client, responder));
        if point.direction() == Direction::Bidirectional {
            plan.push((responder, Role::Client, initiator));
        }
        plan
    }

    async fn ensure_running(&self, host: &Host) -> Result<(), ExecutionFailure> {
        let command = format!(
            "pgrep -f {} > /dev/null",
            process_pattern(&self.config.workload_path)
        );
        let output = self
            .executor
            .run(host, &command, self.config.command_timeout)
            .await?;

        if output.success() {
            Ok(())
        } else {
            Err(ExecutionFailure::Setup {
                host: host.name.clone(),
                reason: "workload exited before counters were sampled".to_string(),
            })
        }
    }
}

#[async_trait]
impl MeasurementCollector for WorkloadCollector {
    async fn cleanup(&self, hosts: &[Host]) -> Result<(), ExecutionFailure> {
        let command = format!("pkill -f {}", process_pattern(&self.config.workload_path));
        for host in hosts {
            let output = self
                .executor
                .run(host, &command, self.config.command_timeout)
                .await?;
            // 0: processes signalled, 1: nothing to stop
            if output.status > 1 {
                warn!(
                    host = %host,
                    status = output.status,
                    stderr = %output.stderr.trim(),
                    "Workload cleanup reported an error"
                );
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        point: &Point,
        hosts: &[Host],
    ) -> Result<MeasurementRecord, ExecutionFailure> {
        if hosts.len() < 2 {
            return Err(ExecutionFailure::Setup {
                host: hosts.first().map(|h| h.name.clone()).unwrap_or_default(),
                reason: "a trial needs a pair of hosts".to_string(),
            });
        }
        let monitor = hosts.get(self.config.monitor_host).ok_or_else(|| {
            ExecutionFailure::Setup {
                host: format!("#{}", self.config.monitor_host),
                reason: "monitor host index out of range".to_string(),
            }
        })?;

        for (local, role, peer) in Self::launch_plan(point) {
            let command = workload_command(
                &self.config.workload_path,
                point,
                role,
                &hosts[local],
                &hosts[peer],
            );
            debug!(host = %hosts[local], role = role.as_str(), "Launching workload");
            self.executor
                .spawn(&hosts[local], &command, self.config.command_timeout)
                .await
                .map_err(|e| ExecutionFailure::Setup {
                    host: hosts[local].name.clone(),
                    reason: e.to_string(),
                })?;
        }

        tokio::time::sleep(self.config.settle).await;

        for host in &hosts[..2] {
            self.ensure_running(host).await?;
        }

        let output = self
            .executor
            .run(
                monitor,
                &counter_command(&monitor.interface),
                self.config.command_timeout,
            )
            .await?
            .check(monitor)
            .map_err(|e| ExecutionFailure::Counters {
                host: monitor.name.clone(),
                reason: e.to_string(),
            })?;

        let counters = parse_counters(&output.stdout);
        if counters.is_empty() {
            return Err(ExecutionFailure::Counters {
                host: monitor.name.clone(),
                reason: "no known counters in output".to_string(),
            });
        }

        info!(host = %monitor, counters = counters.len(), "Sampled NIC counters");
        Ok(MeasurementRecord {
            counters,
            ..Default::default()
        })
    }
}
