//! Error types for fleetguard

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::validation::ValidationResult;

/// Failure signature assigned where a failure is first observed.
///
/// Recovery dispatch in the guardian is a `match` over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Something is already bound to a port the application needs
    PortConflict,

    /// The remote end actively refused the connection
    ConnectionRefused,

    /// A file or build artifact the command expected is absent
    MissingArtifact,

    /// Anything else
    Other,
}

impl FailureKind {
    /// Classify raw command output (usually stderr)
    pub fn classify(output: &str) -> Self {
        let lower = output.to_lowercase();
        if lower.contains("address already in use") || lower.contains("eaddrinuse") {
            FailureKind::PortConflict
        } else if lower.contains("connection refused") || lower.contains("econnrefused") {
            FailureKind::ConnectionRefused
        } else if lower.contains("no such file") || lower.contains("enoent") {
            FailureKind::MissingArtifact
        } else {
            FailureKind::Other
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::PortConflict => "port_conflict",
            FailureKind::ConnectionRefused => "connection_refused",
            FailureKind::MissingArtifact => "missing_artifact",
            FailureKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Main error type for fleetguard
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Timeout: {operation} did not finish within {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Execution error ({kind}, exit {exit_code:?}) running `{command}`: {stderr}")]
    Exec {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
        kind: FailureKind,
    },

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        result: Box<ValidationResult>,
    },

    #[error("Deadlock detected for {key}: {attempts} attempts over {elapsed:?}")]
    Deadlock {
        key: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Another deployment holds the lock for {target}")]
    LockTimeout { target: String },

    #[error("Process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// Failure signature used for recovery dispatch
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            GuardError::Exec { kind, .. } => *kind,
            GuardError::HttpError(e) if e.is_connect() => FailureKind::ConnectionRefused,
            _ => FailureKind::Other,
        }
    }

    /// Whether this failure counts towards the deadlock attempt counter
    pub fn counts_as_attempt(&self) -> bool {
        !matches!(self, GuardError::Cancelled)
    }

    /// Build an execution error, classifying the output
    pub fn exec(command: impl Into<String>, exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        GuardError::Exec {
            command: command.into(),
            exit_code,
            kind: FailureKind::classify(&stderr),
            stderr,
        }
    }
}
