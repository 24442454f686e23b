//! Application process lifecycle on remote hosts
//!
//! The launched process is detached on the remote side and is not supervised
//! from here. Whether it actually serves traffic is decided by the health
//! validator.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::GuardError;
use crate::models::environment::Environment;
use crate::remote::executor::{shell_quote, RemoteExecutor, Timeouts};

/// Restart options
#[derive(Debug, Clone, Default)]
pub struct RestartOptions {
    /// Remove the environment's cache directories before starting
    pub clear_cache: bool,

    /// Override the environment's settle delay
    pub settle_delay: Option<Duration>,
}

/// Outcome of a restart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartOutcome {
    /// Whether a running instance was found and killed
    pub killed_existing: bool,

    /// Pid reported by the remote shell, if parseable
    pub pid: Option<u32>,

    /// Where the application output goes
    pub log_file: String,
}

/// Stops and starts the application on an environment's host
pub struct ProcessManager {
    executor: Arc<dyn RemoteExecutor>,
    timeouts: Timeouts,
    cancel: CancellationToken,
}

impl ProcessManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>, timeouts: Timeouts, cancel: CancellationToken) -> Self {
        Self {
            executor,
            timeouts,
            cancel,
        }
    }

    /// Kill any process matching the environment's pattern
    ///
    /// Returns false when nothing matched, which is not an error.
    pub async fn stop(&self, env: &Environment) -> Result<bool, GuardError> {
        let command = format!("pkill -f {}", shell_quote(&env.process_pattern));
        match self
            .executor
            .execute(&env.target(), &command, self.timeouts.command)
            .await
        {
            Ok(_) => {
                info!("Stopped running instance on {}", env.name);
                Ok(true)
            }
            Err(GuardError::Exec {
                exit_code: Some(1), ..
            }) => {
                debug!("No running instance matched '{}' on {}", env.process_pattern, env.name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove build/cache directories
    pub async fn clear_cache(&self, env: &Environment) -> Result<(), GuardError> {
        if env.cache_dirs.is_empty() {
            return Ok(());
        }

        let dirs = env
            .cache_dirs
            .iter()
            .map(|d| shell_quote(d))
            .collect::<Vec<_>>()
            .join(" ");
        info!("Clearing caches on {}: {}", env.name, env.cache_dirs.join(", "));

        let command = format!("cd {} && rm -rf -- {}", shell_quote(&env.path), dirs);
        self.executor
            .execute(&env.target(), &command, self.timeouts.build)
            .await?;
        Ok(())
    }

    /// Launch the start command detached, output redirected to the log file
    ///
    /// Only `nohup` is backgrounded: the session's stdout must close once
    /// `echo $!` returns, and `$!` must be the app's pid, not a subshell's.
    pub async fn launch(&self, env: &Environment) -> Result<Option<u32>, GuardError> {
        let command = format!(
            "cd {} && {{ nohup sh -c {} > {} 2>&1 < /dev/null & echo $!; }}",
            shell_quote(&env.path),
            shell_quote(&env.start_command),
            shell_quote(&env.log_file())
        );
        let output = self
            .executor
            .execute(&env.target(), &command, self.timeouts.command)
            .await?;

        let pid = output.first_line().parse::<u32>().ok();
        info!("Launched '{}' on {} (pid {:?})", env.start_command, env.name, pid);
        Ok(pid)
    }

    /// Stop, optionally clear caches, start and wait for the settle delay
    pub async fn restart(&self, env: &Environment, options: &RestartOptions) -> Result<RestartOutcome, GuardError> {
        let killed_existing = self.stop(env).await?;

        if options.clear_cache {
            self.clear_cache(env).await?;
        }

        let pid = self.launch(env).await?;

        let settle = options
            .settle_delay
            .unwrap_or_else(|| Duration::from_secs(env.settle_delay_secs));
        debug!("Waiting {:?} for {} to settle", settle, env.name);
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(GuardError::Cancelled),
            _ = tokio::time::sleep(settle) => {}
        }

        Ok(RestartOutcome {
            killed_existing,
            pid,
            log_file: env.log_file(),
        })
    }
}
