//! Deployment pipeline: pre-check → sync → deploy → validate, with single-depth rollback

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::deploy::fsm::{DeploymentPhase, PhaseEvent, PhaseFsm};
use crate::deploy::git::{short, RepositorySynchronizer, WorkingCopy};
use crate::deploy::health::HealthValidator;
use crate::deploy::lock::TargetLocks;
use crate::deploy::process::{ProcessManager, RestartOptions};
use crate::errors::GuardError;
use crate::guardian::state::OperationKind;
use crate::guardian::Guardian;
use crate::models::deployment::{DeployOptions, DeploymentRun, LogLevel, RunOutcome};
use crate::models::environment::Environment;
use crate::models::validation::ValidationResult;

/// A run that did not succeed, with its full phase log
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub run: DeploymentRun,
    pub error: GuardError,
}

/// Runs deployments for environments
pub struct DeploymentOrchestrator {
    guardian: Arc<Guardian>,
    synchronizer: Arc<RepositorySynchronizer>,
    processes: Arc<ProcessManager>,
    validator: Arc<HealthValidator>,
    working_copy: Arc<dyn WorkingCopy>,
    locks: TargetLocks,
    pass_threshold: f64,
}

impl DeploymentOrchestrator {
    pub fn new(
        guardian: Arc<Guardian>,
        synchronizer: Arc<RepositorySynchronizer>,
        processes: Arc<ProcessManager>,
        validator: Arc<HealthValidator>,
        working_copy: Arc<dyn WorkingCopy>,
        locks: TargetLocks,
        pass_threshold: f64,
    ) -> Self {
        Self {
            guardian,
            synchronizer,
            processes,
            validator,
            working_copy,
            locks,
            pass_threshold,
        }
    }

    /// Deploy the local HEAD to `env`
    ///
    /// The returned run carries the phase log on success and on failure.
    pub async fn deploy(
        &self,
        env: &Environment,
        options: DeployOptions,
    ) -> Result<DeploymentRun, RunFailure> {
        let key = format!("deploy:{}", env.name);
        let audit = self.guardian.audit();
        audit
            .record(&key, "deploy", "started", options.reason.clone())
            .await;

        let result = self.execute(env, options).await;

        let (run, detail) = match &result {
            Ok(run) => (run, run.local_commit.clone()),
            Err(failure) => (&failure.run, Some(failure.error.to_string())),
        };
        audit
            .record(&key, "deploy", &run.outcome.to_string(), detail)
            .await;
        result
    }

    async fn execute(
        &self,
        env: &Environment,
        options: DeployOptions,
    ) -> Result<DeploymentRun, RunFailure> {
        let mut run = DeploymentRun::new(&env.name, options.clone());
        let mut fsm = PhaseFsm::new();

        let _lock = match self.locks.acquire(&env.name).await {
            Ok(guard) => guard,
            Err(e) => return Err(self.fail(&mut fsm, run, e)),
        };

        note(
            &mut run,
            DeploymentPhase::PreCheck,
            LogLevel::Info,
            match &options.reason {
                Some(reason) => format!("Deploying to {} ({}): {}", env.name, env.host, reason),
                None => format!("Deploying to {} ({})", env.name, env.host),
            },
        );

        let target_commit = match self.pre_check(&mut run).await {
            Ok(commit) => commit,
            Err(e) => return Err(self.fail(&mut fsm, run, e)),
        };
        if let Err(e) = advance(&mut fsm) {
            return Err(self.fail(&mut fsm, run, e));
        }

        match self
            .forward(env, &target_commit, &options, &mut fsm, &mut run)
            .await
        {
            Ok(()) => {
                note(
                    &mut run,
                    DeploymentPhase::Done,
                    LogLevel::Info,
                    format!("Deployed {} to {}", short(&target_commit), env.name),
                );
                run.finish(RunOutcome::Succeeded);
                Ok(run)
            }
            Err(e) if options.auto_rollback && is_rollback_eligible(&e) => {
                Err(self.rollback(env, &options, fsm, run, e).await)
            }
            Err(e) => Err(self.fail(&mut fsm, run, e)),
        }
    }

    async fn pre_check(&self, run: &mut DeploymentRun) -> Result<String, GuardError> {
        let commit = self.working_copy.head_commit().await?;
        let branch = self.working_copy.branch().await?;
        note(
            run,
            DeploymentPhase::PreCheck,
            LogLevel::Info,
            format!("Local HEAD {} on {}", short(&commit), branch),
        );

        match self.working_copy.has_uncommitted_changes().await {
            Ok(true) => note(
                run,
                DeploymentPhase::PreCheck,
                LogLevel::Warn,
                "Uncommitted local changes are not part of this deployment",
            ),
            Ok(false) => {}
            Err(e) => note(
                run,
                DeploymentPhase::PreCheck,
                LogLevel::Warn,
                format!("Could not check for local changes: {}", e),
            ),
        }

        run.local_commit = Some(commit.clone());
        run.local_branch = Some(branch);
        Ok(commit)
    }

    async fn forward(
        &self,
        env: &Environment,
        target_commit: &str,
        options: &DeployOptions,
        fsm: &mut PhaseFsm,
        run: &mut DeploymentRun,
    ) -> Result<(), GuardError> {
        // Sync
        let sync = self
            .guardian
            .run(OperationKind::Sync, env, || {
                self.synchronizer.sync(env, target_commit, options.force_sync)
            })
            .await?;
        if sync.already_synced {
            note(
                run,
                DeploymentPhase::Sync,
                LogLevel::Info,
                format!("Remote already at {}", short(&sync.current_commit)),
            );
        } else {
            note(
                run,
                DeploymentPhase::Sync,
                LogLevel::Info,
                format!(
                    "Remote moved {} -> {}",
                    short(&sync.previous_commit),
                    short(&sync.current_commit)
                ),
            );
        }
        for warning in &sync.warnings {
            note(run, DeploymentPhase::Sync, LogLevel::Warn, warning.clone());
        }
        advance(fsm)?;

        // Deploy
        self.restart(env, options, DeploymentPhase::Deploy, run).await?;
        advance(fsm)?;

        // Validate
        self.validate(env, DeploymentPhase::Validate, run).await?;
        advance(fsm)?;

        Ok(())
    }

    async fn restart(
        &self,
        env: &Environment,
        options: &DeployOptions,
        phase: DeploymentPhase,
        run: &mut DeploymentRun,
    ) -> Result<(), GuardError> {
        let restart_options = RestartOptions {
            clear_cache: options.no_cache,
            settle_delay: None,
        };
        let outcome = self
            .guardian
            .run(OperationKind::Deploy, env, || {
                self.processes.restart(env, &restart_options)
            })
            .await?;

        note(
            run,
            phase,
            LogLevel::Info,
            format!(
                "Started '{}'{} (pid {}), logging to {}",
                env.start_command,
                if outcome.killed_existing { " after stopping previous instance" } else { "" },
                outcome
                    .pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                outcome.log_file
            ),
        );
        Ok(())
    }

    async fn validate(
        &self,
        env: &Environment,
        phase: DeploymentPhase,
        run: &mut DeploymentRun,
    ) -> Result<ValidationResult, GuardError> {
        let outcome = self
            .guardian
            .run(OperationKind::Validate, env, || async {
                let result = self
                    .validator
                    .validate(env, &env.endpoints, self.pass_threshold)
                    .await;
                if result.healthy {
                    Ok(result)
                } else {
                    Err(GuardError::Validation {
                        message: result.summary(),
                        result: Box::new(result),
                    })
                }
            })
            .await;

        let breakdown = match &outcome {
            Ok(result) => Some(result),
            Err(GuardError::Validation { result, .. }) => Some(result.as_ref()),
            Err(_) => None,
        };
        if let Some(result) = breakdown {
            for endpoint in &result.endpoints {
                let level = if endpoint.passed { LogLevel::Info } else { LogLevel::Warn };
                let observed = endpoint
                    .status
                    .map(|s| s.to_string())
                    .or_else(|| endpoint.error.clone())
                    .unwrap_or_else(|| "no response".to_string());
                run.record(
                    phase,
                    level,
                    format!(
                        "{} {} (expected {}, got {})",
                        if endpoint.passed { "PASS" } else { "FAIL" },
                        endpoint.route,
                        endpoint.expected,
                        observed
                    ),
                );
            }
            note(run, phase, LogLevel::Info, result.summary());
        }

        outcome
    }

    async fn rollback(
        &self,
        env: &Environment,
        options: &DeployOptions,
        mut fsm: PhaseFsm,
        mut run: DeploymentRun,
        original: GuardError,
    ) -> RunFailure {
        let failed_phase = fsm.phase();
        note(&mut run, failed_phase, LogLevel::Error, original.to_string());

        if let Err(e) = fsm.process(PhaseEvent::Rollback(original.to_string())) {
            return self.fail(&mut fsm, run, GuardError::Internal(e));
        }
        note(
            &mut run,
            DeploymentPhase::RollbackAttempt,
            LogLevel::Warn,
            format!("{} failed, rolling back {}", failed_phase, env.name),
        );

        match self.rollback_steps(env, options, &mut run).await {
            Ok(()) => {
                transition(&mut fsm, PhaseEvent::Advance);
                note(
                    &mut run,
                    DeploymentPhase::Done,
                    LogLevel::Warn,
                    "Rollback succeeded; deployment not applied",
                );
                run.finish(RunOutcome::RolledBack);
                RunFailure {
                    run,
                    error: original,
                }
            }
            Err(rollback_err) => {
                transition(&mut fsm, PhaseEvent::Fail(rollback_err.to_string()));
                let fatal = GuardError::Fatal(format!(
                    "deployment failed: {}; rollback failed: {}",
                    original, rollback_err
                ));
                note(&mut run, DeploymentPhase::Fatal, LogLevel::Error, fatal.to_string());
                run.finish(RunOutcome::Fatal);
                RunFailure { run, error: fatal }
            }
        }
    }

    async fn rollback_steps(
        &self,
        env: &Environment,
        options: &DeployOptions,
        run: &mut DeploymentRun,
    ) -> Result<(), GuardError> {
        let (from, to) = self
            .guardian
            .run(OperationKind::Rollback, env, || {
                self.synchronizer.rollback_to_parent(env)
            })
            .await?;
        note(
            run,
            DeploymentPhase::RollbackAttempt,
            LogLevel::Info,
            format!("Remote reset {} -> {}", short(&from), short(&to)),
        );

        self.restart(env, options, DeploymentPhase::RollbackAttempt, run)
            .await?;
        self.validate(env, DeploymentPhase::RollbackAttempt, run)
            .await?;
        Ok(())
    }

    fn fail(&self, fsm: &mut PhaseFsm, mut run: DeploymentRun, error: GuardError) -> RunFailure {
        let phase = fsm.phase();
        note(&mut run, phase, LogLevel::Error, error.to_string());
        if !phase.is_terminal() {
            transition(fsm, PhaseEvent::Fail(error.to_string()));
        }

        let outcome = if matches!(error, GuardError::Fatal(_)) {
            RunOutcome::Fatal
        } else {
            RunOutcome::Failed
        };
        run.finish(outcome);
        RunFailure { run, error }
    }
}

fn advance(fsm: &mut PhaseFsm) -> Result<DeploymentPhase, GuardError> {
    fsm.process(PhaseEvent::Advance).map_err(GuardError::Internal)
}

/// Apply a transition on a path that has already settled the run's outcome
fn transition(fsm: &mut PhaseFsm, event: PhaseEvent) -> Option<DeploymentPhase> {
    let from = fsm.phase();
    match fsm.process(event) {
        Ok(phase) => Some(phase),
        Err(e) => {
            warn!("Ignoring phase event in {}: {}", from, e);
            None
        }
    }
}

/// Fatal failures and cancellation end the run without rollback
fn is_rollback_eligible(error: &GuardError) -> bool {
    !matches!(error, GuardError::Fatal(_) | GuardError::Cancelled)
}

fn note(run: &mut DeploymentRun, phase: DeploymentPhase, level: LogLevel, message: impl Into<String>) {
    let message = message.into();
    match level {
        LogLevel::Info => info!("[{}] {}", phase, message),
        LogLevel::Warn => warn!("[{}] {}", phase, message),
        LogLevel::Error => error!("[{}] {}", phase, message),
    }
    run.record(phase, level, message);
}
