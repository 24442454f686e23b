//! Command runners

use colored::{ColoredString, Colorize};
use tracing::info;

use crate::app::options::Command;
use crate::app::state::AppState;
use crate::deploy::fsm::DeploymentPhase;
use crate::deploy::process::RestartOptions;
use crate::errors::GuardError;
use crate::guardian::state::OperationKind;
use crate::models::deployment::{DeploymentRun, LogLevel, RunOutcome};
use crate::models::validation::ValidationResult;

/// Run one command to completion
///
/// Output for the operator goes to stdout; an `Err` means a non-zero exit.
pub async fn run(state: &AppState, command: Command) -> Result<(), GuardError> {
    let env = state.registry.get(command.target())?.clone();

    match command {
        Command::Deploy { options, .. } => match state.orchestrator.deploy(&env, options).await {
            Ok(run) => {
                println!("{}", render_run(&run));
                Ok(())
            }
            Err(failure) => {
                println!("{}", render_run(&failure.run));
                Err(failure.error)
            }
        },
        Command::GuardianStart { .. } => {
            let options = RestartOptions::default();
            let outcome = state
                .guardian
                .run(OperationKind::Restart, &env, || {
                    state.processes.restart(&env, &options)
                })
                .await?;
            println!(
                "{} {} started on {} (pid {}), logging to {}",
                "Success:".green().bold(),
                env.start_command,
                env.host,
                outcome
                    .pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                outcome.log_file
            );
            Ok(())
        }
        Command::GuardianTest { .. } => {
            let target = env.target();
            let timeout = state.settings.timeouts().command;
            state
                .guardian
                .run(OperationKind::Connectivity, &env, || async {
                    let output = state.executor.execute(&target, "echo ok", timeout).await?;
                    if output.first_line() == "ok" {
                        Ok(())
                    } else {
                        Err(GuardError::Process(format!(
                            "unexpected reply from {}: {:?}",
                            target, output.stdout
                        )))
                    }
                })
                .await?;
            info!("Connectivity to {} verified", target);
            println!("{} {} is reachable over SSH", "Success:".green().bold(), target);
            Ok(())
        }
        Command::HealthCheck { .. } => {
            let result = state
                .validator
                .validate(&env, &env.endpoints, state.settings.health.pass_threshold)
                .await;
            println!("{}", render_validation(&result));
            if result.healthy {
                Ok(())
            } else {
                Err(GuardError::Validation {
                    message: result.summary(),
                    result: Box::new(result),
                })
            }
        }
    }
}

/// Human-readable phase log
pub fn render_run(run: &DeploymentRun) -> String {
    let mut lines = vec![format!(
        "{} {} [{}]",
        "Deployment".bold(),
        run.environment,
        run.id
    )];
    if let Some(reason) = &run.reason {
        lines.push(format!("  reason: {}", reason));
    }

    for entry in &run.log {
        lines.push(format!(
            "  {} {:<9} {} {}",
            entry.at.format("%H:%M:%S"),
            phase_label(entry.phase),
            level_label(entry.level),
            entry.message
        ));
    }

    let outcome = run.outcome.to_string();
    let outcome = match run.outcome {
        RunOutcome::Succeeded => outcome.green().bold(),
        RunOutcome::RolledBack => outcome.yellow().bold(),
        RunOutcome::InProgress => outcome.normal(),
        RunOutcome::Failed | RunOutcome::Fatal => outcome.red().bold(),
    };
    lines.push(format!("{} {}", "Outcome:".bold(), outcome));
    lines.join("\n")
}

/// Per-endpoint breakdown and verdict
pub fn render_validation(result: &ValidationResult) -> String {
    let mut lines = Vec::with_capacity(result.endpoints.len() + 1);
    for endpoint in &result.endpoints {
        let mark = if endpoint.passed {
            "PASS".green()
        } else {
            "FAIL".red()
        };
        let observed = match (endpoint.status, &endpoint.error) {
            (Some(status), _) => status.to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => "no response".to_string(),
        };
        lines.push(format!(
            "  {} {} expected {} got {}",
            mark, endpoint.url, endpoint.expected, observed
        ));
    }

    let summary = result.summary();
    lines.push(if result.healthy {
        summary.green().bold().to_string()
    } else {
        summary.red().bold().to_string()
    });
    lines.join("\n")
}

fn phase_label(phase: DeploymentPhase) -> ColoredString {
    let label = phase.to_string();
    match phase {
        DeploymentPhase::Done => label.green(),
        DeploymentPhase::Failed | DeploymentPhase::Fatal => label.red(),
        DeploymentPhase::RollbackAttempt => label.yellow(),
        _ => label.cyan(),
    }
}

fn level_label(level: LogLevel) -> ColoredString {
    match level {
        LogLevel::Info => "INFO ".normal(),
        LogLevel::Warn => "WARN ".yellow(),
        LogLevel::Error => "ERROR".red().bold(),
    }
}
