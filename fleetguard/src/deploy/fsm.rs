//! Finite State Machine for deployment phases

use serde::{Deserialize, Serialize};

/// Deployment phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    /// Capture local commit/branch, check for uncommitted changes
    PreCheck,

    /// Bring the remote working copy to the target commit
    Sync,

    /// Restart the application process
    Deploy,

    /// Probe health endpoints
    Validate,

    /// Reset to the previous commit, redeploy and validate again
    RollbackAttempt,

    /// Finished (either deployed, or rolled back successfully)
    Done,

    /// Failed without rollback
    Failed,

    /// Rollback failed, or recovery failed
    Fatal,
}

impl DeploymentPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentPhase::Done | DeploymentPhase::Failed | DeploymentPhase::Fatal
        )
    }
}

impl std::fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentPhase::PreCheck => "pre-check",
            DeploymentPhase::Sync => "sync",
            DeploymentPhase::Deploy => "deploy",
            DeploymentPhase::Validate => "validate",
            DeploymentPhase::RollbackAttempt => "rollback",
            DeploymentPhase::Done => "done",
            DeploymentPhase::Failed => "failed",
            DeploymentPhase::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Phase event
#[derive(Debug, Clone)]
pub enum PhaseEvent {
    /// Current phase completed
    Advance,

    /// Current phase failed, no rollback
    Fail(String),

    /// Current phase failed, roll back
    Rollback(String),
}

/// Phase FSM for one deployment run
#[derive(Debug, Clone)]
pub struct PhaseFsm {
    phase: DeploymentPhase,
    error: Option<String>,
    rollback_count: u32,
}

impl PhaseFsm {
    /// Create a new FSM in the pre-check phase
    pub fn new() -> Self {
        Self {
            phase: DeploymentPhase::PreCheck,
            error: None,
            rollback_count: 0,
        }
    }

    /// Get current phase
    pub fn phase(&self) -> DeploymentPhase {
        self.phase
    }

    /// Get the error that caused a failure or rollback
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of rollbacks entered (0 or 1)
    pub fn rollback_count(&self) -> u32 {
        self.rollback_count
    }

    /// Whether the run ended in `Done` through a rollback
    pub fn rolled_back(&self) -> bool {
        self.phase == DeploymentPhase::Done && self.rollback_count > 0
    }

    /// Process an event and transition phase
    pub fn process(&mut self, event: PhaseEvent) -> Result<DeploymentPhase, String> {
        use DeploymentPhase::*;

        let next = match (self.phase, &event) {
            // Forward path
            (PreCheck, PhaseEvent::Advance) => Sync,
            (Sync, PhaseEvent::Advance) => Deploy,
            (Deploy, PhaseEvent::Advance) => Validate,
            (Validate, PhaseEvent::Advance) => Done,

            // Failure without rollback
            (PreCheck | Sync | Deploy | Validate, PhaseEvent::Fail(err)) => {
                self.error = Some(err.clone());
                Failed
            }

            // Rollback is only reachable after pre-check, and only once
            (Sync | Deploy | Validate, PhaseEvent::Rollback(err)) if self.rollback_count == 0 => {
                self.error = Some(err.clone());
                self.rollback_count += 1;
                RollbackAttempt
            }

            // From RollbackAttempt
            (RollbackAttempt, PhaseEvent::Advance) => Done,
            (RollbackAttempt, PhaseEvent::Fail(err)) => {
                let original = self.error.take().unwrap_or_default();
                self.error = Some(format!("{}; rollback failed: {}", original, err));
                Fatal
            }

            // Invalid transitions
            (phase, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", phase, event));
            }
        };

        self.phase = next;
        Ok(next)
    }
}

impl Default for PhaseFsm {
    fn default() -> Self {
        Self::new()
    }
}
