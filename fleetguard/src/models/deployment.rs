//! Deployment run models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentPhase;

/// Options for one deployment run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Free-text reason recorded in the run and the audit log
    pub reason: Option<String>,

    /// Fetch and reset even when the remote HEAD already matches
    pub force_sync: bool,

    /// Remove build/cache directories before starting
    pub no_cache: bool,

    /// Roll back to the previous commit if a phase fails
    pub auto_rollback: bool,
}

/// Severity of a phase log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A single entry of the phase log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseLogEntry {
    pub at: DateTime<Utc>,
    pub phase: DeploymentPhase,
    pub level: LogLevel,
    pub message: String,
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Still running
    InProgress,
    Succeeded,
    Failed,
    /// A phase failed and the previous commit was restored and validated
    RolledBack,
    /// Rollback failed too, or recovery itself failed
    Fatal,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunOutcome::InProgress => "in_progress",
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed => "failed",
            RunOutcome::RolledBack => "rolled_back",
            RunOutcome::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// One end-to-end orchestration pass for one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: String,
    pub environment: String,
    pub reason: Option<String>,
    pub options: DeployOptions,
    pub local_commit: Option<String>,
    pub local_branch: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    pub log: Vec<PhaseLogEntry>,
}

impl DeploymentRun {
    pub fn new(environment: &str, options: DeployOptions) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            environment: environment.to_string(),
            reason: options.reason.clone(),
            options,
            local_commit: None,
            local_branch: None,
            started_at: Utc::now(),
            finished_at: None,
            outcome: RunOutcome::InProgress,
            log: Vec::new(),
        }
    }

    /// Append a log entry
    pub fn record(&mut self, phase: DeploymentPhase, level: LogLevel, message: impl Into<String>) {
        self.log.push(PhaseLogEntry {
            at: Utc::now(),
            phase,
            level,
            message: message.into(),
        });
    }

    /// Mark the run as terminated
    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
    }

    /// Phases in the order they were first entered
    pub fn phases(&self) -> Vec<DeploymentPhase> {
        let mut phases: Vec<DeploymentPhase> = Vec::new();
        for entry in &self.log {
            if phases.last() != Some(&entry.phase) {
                phases.push(entry.phase);
            }
        }
        phases
    }
}
