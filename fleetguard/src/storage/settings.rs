//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::GuardError;
use crate::guardian::state::GuardianSettings;
use crate::logs::LogLevel;
use crate::models::validation::DEFAULT_PASS_THRESHOLD;
use crate::remote::executor::Timeouts;

/// fleetguard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily log files under `<base_dir>/logs`
    #[serde(default)]
    pub log_to_file: bool,

    /// Deadlock detection and recovery thresholds
    #[serde(default)]
    pub guardian: GuardianSection,

    /// Health validation
    #[serde(default)]
    pub health: HealthSection,

    /// Remote command timeouts
    #[serde(default)]
    pub timeouts: TimeoutSection,

    /// Seconds to wait for another deployment of the same target before failing
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_lock_timeout_secs() -> u64 {
    5
}

impl Settings {
    pub fn guardian_settings(&self) -> GuardianSettings {
        let g = &self.guardian;
        GuardianSettings {
            attempt_threshold: g.attempt_threshold.max(1),
            deadlock_window: Duration::from_secs(g.deadlock_window_secs),
            force_recovery_after: Duration::from_secs(g.force_recovery_after_secs),
            operation_timeout: Duration::from_secs(g.operation_timeout_secs),
            long_operation_timeout: Duration::from_secs(g.long_operation_timeout_secs),
            recovery_wait: Duration::from_secs(g.recovery_wait_secs),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            command: Duration::from_secs(self.timeouts.command_secs),
            build: Duration::from_secs(self.timeouts.build_secs),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health.probe_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Reject values that would make every run fail or never fail
    pub fn validate(&self) -> Result<(), GuardError> {
        let threshold = self.health.pass_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(GuardError::ConfigError(format!(
                "health.pass_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        let timeouts = [
            ("timeouts.command_secs", self.timeouts.command_secs),
            ("timeouts.build_secs", self.timeouts.build_secs),
            ("guardian.operation_timeout_secs", self.guardian.operation_timeout_secs),
            ("guardian.long_operation_timeout_secs", self.guardian.long_operation_timeout_secs),
            ("guardian.recovery_wait_secs", self.guardian.recovery_wait_secs),
            ("health.probe_timeout_secs", self.health.probe_timeout_secs),
            ("lock_timeout_secs", self.lock_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(GuardError::ConfigError(format!(
                "{} must be greater than zero",
                name
            )));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            guardian: GuardianSection::default(),
            health: HealthSection::default(),
            timeouts: TimeoutSection::default(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

/// Guardian thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianSection {
    #[serde(default = "default_attempt_threshold")]
    pub attempt_threshold: u32,

    #[serde(default = "default_deadlock_window_secs")]
    pub deadlock_window_secs: u64,

    #[serde(default = "default_force_recovery_after_secs")]
    pub force_recovery_after_secs: u64,

    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_long_operation_timeout_secs")]
    pub long_operation_timeout_secs: u64,

    #[serde(default = "default_recovery_wait_secs")]
    pub recovery_wait_secs: u64,
}

fn default_attempt_threshold() -> u32 {
    3
}

fn default_deadlock_window_secs() -> u64 {
    60
}

fn default_force_recovery_after_secs() -> u64 {
    120
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_long_operation_timeout_secs() -> u64 {
    300
}

fn default_recovery_wait_secs() -> u64 {
    120
}

impl Default for GuardianSection {
    fn default() -> Self {
        Self {
            attempt_threshold: default_attempt_threshold(),
            deadlock_window_secs: default_deadlock_window_secs(),
            force_recovery_after_secs: default_force_recovery_after_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            long_operation_timeout_secs: default_long_operation_timeout_secs(),
            recovery_wait_secs: default_recovery_wait_secs(),
        }
    }
}

/// Health validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSection {
    /// Fraction of endpoints that must pass
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_pass_threshold() -> f64 {
    DEFAULT_PASS_THRESHOLD
}

fn default_probe_timeout_secs() -> u64 {
    10
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            pass_threshold: default_pass_threshold(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Remote command timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSection {
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,

    #[serde(default = "default_build_secs")]
    pub build_secs: u64,
}

fn default_command_secs() -> u64 {
    30
}

fn default_build_secs() -> u64 {
    300
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            command_secs: default_command_secs(),
            build_secs: default_build_secs(),
        }
    }
}
