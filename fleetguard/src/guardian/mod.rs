//! Deadlock detection and recovery around guarded operations
//!
//! Every externally visible operation of a deployment runs through
//! [`Guardian::run`]. Per (operation, target) the guardian moves through:
//!
//! ```text
//! Idle -> Attempting -> Succeeded (-> Idle)
//!                    -> Deadlocked -> ForceRecovering -> Attempting
//! ```
//!
//! The deadlock check uses the history of prior invocations and runs before
//! the operation. Failures are dispatched on their [`FailureKind`] and then
//! returned to the caller unchanged; recovery prepares the next attempt, it
//! does not hide the failure of this one.

pub mod recovery;
pub mod state;

use std::future::Future;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::errors::{FailureKind, GuardError};
use crate::guardian::recovery::{RecoveryAction, RecoveryCoordinator};
use crate::guardian::state::{
    Assessment, AttemptKey, AttemptRecord, AttemptStore, GuardianSettings, OperationKind,
};
use crate::models::environment::Environment;

pub struct Guardian {
    store: AttemptStore,
    settings: GuardianSettings,
    recovery: RecoveryCoordinator,
    audit: AuditLog,
    cancel: CancellationToken,
}

impl Guardian {
    pub fn new(
        settings: GuardianSettings,
        recovery: RecoveryCoordinator,
        audit: AuditLog,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store: AttemptStore::new(),
            settings,
            recovery,
            audit,
            cancel,
        }
    }

    pub fn settings(&self) -> &GuardianSettings {
        &self.settings
    }

    pub fn recovery(&self) -> &RecoveryCoordinator {
        &self.recovery
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Current streak for a key
    pub fn snapshot(&self, operation: OperationKind, target: &str) -> Option<AttemptRecord> {
        self.store.record(&AttemptKey::new(operation, target))
    }

    /// Last success time for a key
    pub fn last_success(&self, operation: OperationKind, target: &str) -> Option<Instant> {
        self.store.last_success(&AttemptKey::new(operation, target))
    }

    /// Pre-invocation verdict for a key
    pub fn assess(&self, operation: OperationKind, target: &str) -> Assessment {
        self.store
            .assess(&AttemptKey::new(operation, target), &self.settings, Instant::now())
    }

    /// Run `op` under deadlock detection, timeout and failure recovery
    pub async fn run<T, F, Fut>(
        &self,
        operation: OperationKind,
        env: &Environment,
        op: F,
    ) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GuardError>>,
    {
        let key = AttemptKey::new(operation, &env.name);
        let key_str = key.to_string();

        match self.store.assess(&key, &self.settings, Instant::now()) {
            Assessment::Clear => {}
            Assessment::Deadlocked { attempts, elapsed } => {
                let warning = GuardError::Deadlock {
                    key: key_str.clone(),
                    attempts,
                    elapsed,
                };
                warn!("{}; attempting once more", warning);
                self.audit
                    .record(&key_str, "deadlock", "warned", Some(warning.to_string()))
                    .await;
            }
            Assessment::ForceRecovery {
                attempts,
                since_success,
                ..
            } => {
                warn!(
                    "{} deadlocked after {} attempts, no success for {:?}: forcing recovery",
                    key, attempts, since_success
                );
                self.audit
                    .record(&key_str, "force_recovery", "started", None)
                    .await;
                if let Err(e) = self.recovery.force_recover(env).await {
                    self.audit
                        .record(&key_str, "force_recovery", "failed", Some(e.to_string()))
                        .await;
                    return Err(e);
                }
                self.audit
                    .record(&key_str, "force_recovery", "succeeded", None)
                    .await;
                self.store.reset_streak(&key);
            }
        }

        let attempt = self.store.begin(&key, Instant::now());
        info!("{} attempt {}", key, attempt);

        let timeout = self.settings.timeout_for(operation);
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(GuardError::Cancelled),
            result = tokio::time::timeout(timeout, op()) => match result {
                Ok(result) => result,
                Err(_) => Err(GuardError::Timeout {
                    operation: key_str.clone(),
                    after: timeout,
                }),
            },
        };

        match outcome {
            Ok(value) => {
                self.store.succeed(&key, Instant::now());
                self.audit
                    .record(&key_str, "attempt", "succeeded", Some(format!("attempt {}", attempt)))
                    .await;
                Ok(value)
            }
            Err(e) if !e.counts_as_attempt() => {
                self.store.withdraw(&key);
                self.audit.record(&key_str, "attempt", "cancelled", None).await;
                Err(e)
            }
            Err(e) => {
                error!("{} attempt {} failed: {}", key, attempt, e);
                self.audit
                    .record(&key_str, "attempt", "failed", Some(e.to_string()))
                    .await;

                match self.dispatch_recovery(env, &e).await {
                    Ok(action) => {
                        if action != RecoveryAction::None {
                            self.audit
                                .record(&key_str, "recovery", "applied", Some(format!("{:?}", action)))
                                .await;
                        }
                        Err(e)
                    }
                    // Only a failed force recovery outranks the original error
                    Err(fatal @ GuardError::Fatal(_)) => {
                        self.audit
                            .record(&key_str, "recovery", "fatal", Some(fatal.to_string()))
                            .await;
                        Err(fatal)
                    }
                    Err(recovery_err) => {
                        warn!("Recovery for {} failed: {}", key, recovery_err);
                        self.audit
                            .record(&key_str, "recovery", "failed", Some(recovery_err.to_string()))
                            .await;
                        Err(e)
                    }
                }
            }
        }
    }

    async fn dispatch_recovery(
        &self,
        env: &Environment,
        err: &GuardError,
    ) -> Result<RecoveryAction, GuardError> {
        match err.failure_kind() {
            FailureKind::PortConflict => {
                info!("Port conflict on {}, freeing ports", env.name);
                self.recovery.free_ports(env).await
            }
            FailureKind::ConnectionRefused => {
                info!("Connection refused by {}, checking connectivity", env.name);
                self.recovery.recover_connectivity(env).await
            }
            FailureKind::MissingArtifact => {
                info!("Missing artifacts on {}, resyncing", env.name);
                self.recovery.resync(env).await
            }
            FailureKind::Other => Ok(RecoveryAction::None),
        }
    }
}
