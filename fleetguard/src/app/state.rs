//! Application state management

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::options::AppOptions;
use crate::audit::AuditLog;
use crate::deploy::git::{GitWorkingCopy, RepositorySynchronizer, WorkingCopy};
use crate::deploy::health::{HealthValidator, HttpProbe, ReqwestProbe};
use crate::deploy::lock::TargetLocks;
use crate::deploy::orchestrator::DeploymentOrchestrator;
use crate::deploy::process::ProcessManager;
use crate::errors::GuardError;
use crate::guardian::recovery::RecoveryCoordinator;
use crate::guardian::Guardian;
use crate::registry::EnvironmentRegistry;
use crate::remote::executor::{RemoteExecutor, SshExecutor};
use crate::storage::settings::Settings;

/// The I/O seams the application is assembled from
pub struct Components {
    pub executor: Arc<dyn RemoteExecutor>,
    pub probe: Arc<dyn HttpProbe>,
    pub working_copy: Arc<dyn WorkingCopy>,
    pub audit: AuditLog,
}

/// Main application state
pub struct AppState {
    pub registry: EnvironmentRegistry,
    pub settings: Settings,
    pub executor: Arc<dyn RemoteExecutor>,
    pub processes: Arc<ProcessManager>,
    pub validator: Arc<HealthValidator>,
    pub guardian: Arc<Guardian>,
    pub orchestrator: DeploymentOrchestrator,
    pub cancel: CancellationToken,
}

impl AppState {
    /// Load the registry and build production components
    pub async fn init(
        options: &AppOptions,
        settings: Settings,
        cancel: CancellationToken,
    ) -> Result<Self, GuardError> {
        info!("Initializing application state...");

        let registry = EnvironmentRegistry::load(&options.layout.environments_file()).await?;

        let components = Components {
            executor: Arc::new(SshExecutor::new(options.ssh.clone(), cancel.clone())),
            probe: Arc::new(ReqwestProbe::new(settings.probe_timeout())?),
            working_copy: Arc::new(GitWorkingCopy::new(options.repo_root.clone())),
            audit: AuditLog::new(options.layout.audit_file()),
        };

        Ok(Self::assemble(registry, settings, components, cancel))
    }

    /// Wire the pipeline from its seams
    pub fn assemble(
        registry: EnvironmentRegistry,
        settings: Settings,
        components: Components,
        cancel: CancellationToken,
    ) -> Self {
        let timeouts = settings.timeouts();
        let guardian_settings = settings.guardian_settings();

        let synchronizer = Arc::new(RepositorySynchronizer::new(
            components.executor.clone(),
            components.working_copy.clone(),
            timeouts,
        ));

        let processes = Arc::new(ProcessManager::new(
            components.executor.clone(),
            timeouts,
            cancel.clone(),
        ));

        let validator = Arc::new(HealthValidator::new(components.probe));

        let recovery = RecoveryCoordinator::new(
            components.executor.clone(),
            synchronizer.clone(),
            timeouts,
            guardian_settings.recovery_wait,
            cancel.clone(),
        );
        let guardian = Arc::new(Guardian::new(
            guardian_settings,
            recovery,
            components.audit,
            cancel.clone(),
        ));

        let orchestrator = DeploymentOrchestrator::new(
            guardian.clone(),
            synchronizer,
            processes.clone(),
            validator.clone(),
            components.working_copy,
            TargetLocks::new(settings.lock_timeout()),
            settings.health.pass_threshold,
        );

        Self {
            registry,
            settings,
            executor: components.executor,
            processes,
            validator,
            guardian,
            orchestrator,
            cancel,
        }
    }
}
