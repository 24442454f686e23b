//! Recovery strategies

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::deploy::git::RepositorySynchronizer;
use crate::errors::GuardError;
use crate::models::environment::Environment;
use crate::remote::executor::{shell_quote, RemoteExecutor, Timeouts};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// What a recovery step did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// No strategy for this failure
    None,

    /// Ports freed and problem processes killed
    PortsFreed,

    /// Host answered ping and/or ssh, nothing escalated
    ConnectivityVerified { ping: bool, ssh: bool },

    /// Host/container restarted at the infrastructure level
    ForceRecovered,

    /// Remote working copy fetched and reset to upstream
    Resynced { commit: String },
}

/// Runs recovery actions against an environment
pub struct RecoveryCoordinator {
    executor: Arc<dyn RemoteExecutor>,
    synchronizer: Arc<RepositorySynchronizer>,
    timeouts: Timeouts,
    recovery_wait: Duration,
    poll_backoff: CooldownOptions,
    cancel: CancellationToken,
}

impl RecoveryCoordinator {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        synchronizer: Arc<RepositorySynchronizer>,
        timeouts: Timeouts,
        recovery_wait: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            synchronizer,
            timeouts,
            recovery_wait,
            poll_backoff: CooldownOptions {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(15),
                multiplier: 1.5,
            },
            cancel,
        }
    }

    /// Free configured ports and kill known problem processes
    pub async fn free_ports(&self, env: &Environment) -> Result<RecoveryAction, GuardError> {
        let target = env.target();

        for port in &env.ports {
            let command = format!("fuser -k {}/tcp", port);
            match self.executor.execute(&target, &command, self.timeouts.command).await {
                Ok(_) => info!("Freed port {} on {}", port, env.name),
                // fuser exits 1 when nothing holds the port
                Err(GuardError::Exec { exit_code: Some(1), .. }) => {
                    debug!("Port {} already free on {}", port, env.name)
                }
                Err(e) => return Err(e),
            }
        }

        for name in &env.problem_processes {
            let command = format!("pkill -f {}", shell_quote(name));
            match self.executor.execute(&target, &command, self.timeouts.command).await {
                Ok(_) => info!("Killed '{}' on {}", name, env.name),
                Err(GuardError::Exec { exit_code: Some(1), .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(RecoveryAction::PortsFreed)
    }

    /// Check ping and ssh reachability
    pub async fn check_connectivity(&self, env: &Environment) -> (bool, bool) {
        let ping = self.executor.reachable(&env.host).await;
        let ssh = self.ssh_alive(env, self.timeouts.command).await;
        debug!("Connectivity for {}: ping={}, ssh={}", env.name, ping, ssh);
        (ping, ssh)
    }

    /// Verify reachability; escalate to force recovery when both checks fail
    pub async fn recover_connectivity(&self, env: &Environment) -> Result<RecoveryAction, GuardError> {
        let (ping, ssh) = self.check_connectivity(env).await;
        if !ping && !ssh {
            warn!("{} unreachable by ping and ssh, escalating to force recovery", env.name);
            self.force_recover(env).await?;
            return Ok(RecoveryAction::ForceRecovered);
        }
        Ok(RecoveryAction::ConnectivityVerified { ping, ssh })
    }

    /// Re-run the sync phase's fetch and reset
    pub async fn resync(&self, env: &Environment) -> Result<RecoveryAction, GuardError> {
        let commit = self.synchronizer.resync(env).await?;
        Ok(RecoveryAction::Resynced { commit })
    }

    /// Restart the host/container and wait until it answers over ssh
    ///
    /// Any failure here is `Fatal`, except cancellation.
    pub async fn force_recover(&self, env: &Environment) -> Result<(), GuardError> {
        let infra = env.infrastructure.as_ref().ok_or_else(|| {
            GuardError::Fatal(format!(
                "Force recovery required for {} but no infrastructure control is configured",
                env.name
            ))
        })?;
        let infra_target = infra.target();

        warn!("Force recovery of {} via {}", env.name, infra_target);

        if let Err(e) = self
            .executor
            .execute(&infra_target, &infra.stop_command, self.timeouts.build)
            .await
        {
            if matches!(e, GuardError::Cancelled) {
                return Err(e);
            }
            // Already stopped is fine; start decides.
            warn!("Stop command for {} failed: {}", env.name, e);
        }

        match self
            .executor
            .execute(&infra_target, &infra.start_command, self.timeouts.build)
            .await
        {
            Ok(_) => {}
            Err(GuardError::Cancelled) => return Err(GuardError::Cancelled),
            Err(e) => {
                return Err(GuardError::Fatal(format!(
                    "Force recovery of {} failed to start: {}",
                    env.name, e
                )))
            }
        }

        self.wait_for_ready(env).await
    }

    async fn wait_for_ready(&self, env: &Environment) -> Result<(), GuardError> {
        let deadline = Instant::now() + self.recovery_wait;
        let mut attempt = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                error!("{} did not come back within {:?}", env.name, self.recovery_wait);
                return Err(GuardError::Fatal(format!(
                    "{} did not respond within {:?} after force recovery",
                    env.name, self.recovery_wait
                )));
            }

            if self.ssh_alive(env, remaining.min(self.timeouts.command)).await {
                info!("{} is back after force recovery", env.name);
                return Ok(());
            }
            if self.cancel.is_cancelled() {
                return Err(GuardError::Cancelled);
            }

            let wait = calc_exp_backoff(&self.poll_backoff, attempt).min(remaining);
            attempt += 1;
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(GuardError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn ssh_alive(&self, env: &Environment, timeout: Duration) -> bool {
        match self.executor.execute(&env.target(), "echo ok", timeout).await {
            Ok(output) => output.first_line() == "ok",
            Err(_) => false,
        }
    }
}
