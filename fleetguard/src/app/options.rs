//! Application configuration options

use std::path::PathBuf;

use crate::models::deployment::DeployOptions;
use crate::remote::executor::SshOptions;
use crate::storage::layout::StorageLayout;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Root of the local working copy whose HEAD gets deployed
    pub repo_root: PathBuf,

    /// SSH client options
    pub ssh: SshOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            repo_root: PathBuf::from("."),
            ssh: SshOptions::default(),
        }
    }
}

/// A single CLI invocation
#[derive(Debug, Clone)]
pub enum Command {
    /// Run the full deployment pipeline
    Deploy {
        environment: String,
        options: DeployOptions,
    },

    /// Guarded process restart
    GuardianStart { target: String },

    /// Guarded connectivity test
    GuardianTest { target: String },

    /// Probe endpoints and report
    HealthCheck { target: String },
}

impl Command {
    /// Environment the command acts on
    pub fn target(&self) -> &str {
        match self {
            Command::Deploy { environment, .. } => environment,
            Command::GuardianStart { target }
            | Command::GuardianTest { target }
            | Command::HealthCheck { target } => target,
        }
    }
}
