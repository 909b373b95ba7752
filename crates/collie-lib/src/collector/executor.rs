//! Remote command execution
//!
//! The search core only needs "run this command on that host and give me
//! its output within a time bound". SSH and local shells are provided.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ExecutionFailure;
use crate::models::Host;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero exit into an [`ExecutionFailure`]
    pub fn check(self, host: &Host) -> Result<Self, ExecutionFailure> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecutionFailure::Command {
                host: host.name.clone(),
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Trait for running shell commands on a host
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion, failing if it outlives `timeout`
    async fn run(
        &self,
        host: &Host,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutionFailure>;

    /// Start a command in the background and return once it is launched
    async fn spawn(
        &self,
        host: &Host,
        command: &str,
        timeout: Duration,
    ) -> Result<(), ExecutionFailure> {
        let detached = format!("nohup {} > /dev/null 2>&1 &", command);
        self.run(host, &detached, timeout).await?.check(host)?;
        Ok(())
    }
}

/// Runs commands over `ssh` in batch mode
#[derive(Debug, Clone)]
pub struct SshExecutor {
    options: Vec<String>,
}

impl SshExecutor {
    pub fn new() -> Self {
        Self {
            options: vec![
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
            ],
        }
    }

    /// Append an extra `ssh` option, e.g. `-p 2222`
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    async fn run(
        &self,
        host: &Host,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutionFailure> {
        let mut cmd = Command::new("ssh");
        cmd.args(&self.options).arg(host.login()).arg(command);
        run_bounded(cmd, host, timeout).await
    }
}

/// Runs commands through the local shell, ignoring the host's address
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn run(
        &self,
        host: &Host,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutionFailure> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        run_bounded(cmd, host, timeout).await
    }
}

async fn run_bounded(
    mut cmd: Command,
    host: &Host,
    timeout: Duration,
) -> Result<CommandOutput, ExecutionFailure> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(host = %host, command = ?cmd.as_std(), "Running command");

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ExecutionFailure::Timeout(timeout))?
        .map_err(|e| ExecutionFailure::Transport {
            host: host.name.clone(),
            reason: e.to_string(),
        })?;

    Ok(CommandOutput {
        // Killed by a signal
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
