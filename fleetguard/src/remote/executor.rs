//! Remote command execution over SSH

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::GuardError;
use crate::models::environment::SshTarget;

/// Captured output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// First line of stdout, trimmed
    pub fn first_line(&self) -> &str {
        self.stdout.lines().next().unwrap_or("").trim()
    }
}

/// Command timeouts by operation class
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Interactive checks (HEAD reads, kills, echo)
    pub command: Duration,

    /// Build-class operations (fetch, cache removal, infra restarts)
    pub build: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(30),
            build: Duration::from_secs(300),
        }
    }
}

/// Runs shell commands on remote hosts
///
/// Implementations never retry; retry and recovery belong to the guardian.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `target`, failing with `Timeout` once `timeout` elapses
    /// and with `Exec` on a non-zero exit status.
    async fn execute(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, GuardError>;

    /// Basic network reachability of a host (ICMP)
    async fn reachable(&self, host: &str) -> bool;
}

/// SSH client options
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    pub ping_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

/// Executor backed by the system `ssh` client
pub struct SshExecutor {
    options: SshOptions,
    cancel: CancellationToken,
}

impl SshExecutor {
    pub fn new(options: SshOptions, cancel: CancellationToken) -> Self {
        Self { options, cancel }
    }

    fn ssh_args(&self, target: &SshTarget) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            target.port.to_string(),
        ];
        if let Some(identity) = &target.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, GuardError> {
        debug!("ssh {}: {}", target, command);
        if self.cancel.is_cancelled() {
            return Err(GuardError::Cancelled);
        }

        let child = Command::new("ssh")
            .args(self.ssh_args(target))
            .arg(target.destination())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GuardError::exec(command, None, format!("Failed to spawn ssh: {}", e)))?;

        // Dropping the wait future kills the child.
        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(GuardError::Cancelled),
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(output) => output?,
                Err(_) => {
                    return Err(GuardError::Timeout {
                        operation: format!("ssh {} `{}`", target, command),
                        after: timeout,
                    })
                }
            },
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: filter_ssh_banners(&String::from_utf8_lossy(&output.stderr)),
            exit_code: output.status.code().unwrap_or(-1),
        };
        trace!("ssh {} exited with {}", target, result.exit_code);

        if output.status.success() {
            Ok(result)
        } else {
            Err(GuardError::exec(command, output.status.code(), result.stderr))
        }
    }

    async fn reachable(&self, host: &str) -> bool {
        let wait = self.options.ping_timeout.as_secs().max(1).to_string();
        let ping = Command::new("ping")
            .args(["-c", "1", "-W", wait.as_str(), host])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            result = tokio::time::timeout(self.options.ping_timeout * 2, ping) => {
                matches!(result, Ok(Ok(status)) if status.success())
            }
        }
    }
}

/// Strip connection noise the ssh client prints on stderr
pub fn filter_ssh_banners(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| !is_ssh_banner(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_ssh_banner(line: &str) -> bool {
    let line = line.trim();
    line.is_empty()
        || line.starts_with("Warning: Permanently added")
        || line.starts_with("Pseudo-terminal will not be allocated")
        || (line.starts_with("Connection to ") && line.ends_with(" closed."))
}

/// Quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
