//! Attempt tracking and deadlock assessment

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Kind of guarded operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Connectivity,
    Sync,
    Deploy,
    Validate,
    Rollback,
    Restart,
}

impl OperationKind {
    /// Operations that may include builds, fetches or settle waits
    pub fn is_long_running(&self) -> bool {
        matches!(
            self,
            OperationKind::Sync | OperationKind::Deploy | OperationKind::Rollback | OperationKind::Restart
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationKind::Connectivity => "connectivity",
            OperationKind::Sync => "sync",
            OperationKind::Deploy => "deploy",
            OperationKind::Validate => "validate",
            OperationKind::Rollback => "rollback",
            OperationKind::Restart => "restart",
        };
        f.write_str(s)
    }
}

/// (operation, target) pair the guardian tracks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub operation: OperationKind,
    pub target: String,
}

impl AttemptKey {
    pub fn new(operation: OperationKind, target: &str) -> Self {
        Self {
            operation,
            target: target.to_string(),
        }
    }
}

impl std::fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.operation, self.target)
    }
}

/// Current failure streak for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    pub count: u32,
    pub first_attempt_at: Instant,
}

/// Guardian thresholds
#[derive(Debug, Clone)]
pub struct GuardianSettings {
    /// Attempts before a streak can be declared deadlocked
    pub attempt_threshold: u32,

    /// Minimum streak age before a deadlock is declared
    pub deadlock_window: Duration,

    /// Time without success after which a deadlock forces recovery
    pub force_recovery_after: Duration,

    /// Timeout for short guarded operations
    pub operation_timeout: Duration,

    /// Timeout for sync/deploy/rollback/restart
    pub long_operation_timeout: Duration,

    /// Maximum wait for a host to come back after force recovery
    pub recovery_wait: Duration,
}

impl Default for GuardianSettings {
    fn default() -> Self {
        Self {
            attempt_threshold: 3,
            deadlock_window: Duration::from_secs(60),
            force_recovery_after: Duration::from_secs(120),
            operation_timeout: Duration::from_secs(30),
            long_operation_timeout: Duration::from_secs(300),
            recovery_wait: Duration::from_secs(120),
        }
    }
}

impl GuardianSettings {
    pub fn timeout_for(&self, operation: OperationKind) -> Duration {
        if operation.is_long_running() {
            self.long_operation_timeout
        } else {
            self.operation_timeout
        }
    }
}

/// Pre-invocation verdict for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    Clear,

    /// Soft warning, the operation still runs
    Deadlocked { attempts: u32, elapsed: Duration },

    /// Deadlocked and no success for longer than `force_recovery_after`
    ForceRecovery {
        attempts: u32,
        elapsed: Duration,
        since_success: Duration,
    },
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<AttemptKey, AttemptRecord>,
    last_success: HashMap<AttemptKey, Instant>,
}

/// Attempt records and last-success times, guarded by one lock
#[derive(Debug, Default)]
pub struct AttemptStore {
    inner: Mutex<StoreInner>,
}

impl AttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Evaluate prior history for `key`
    ///
    /// A key that never succeeded measures its success age from the start of
    /// the current streak.
    pub fn assess(&self, key: &AttemptKey, settings: &GuardianSettings, now: Instant) -> Assessment {
        let inner = self.lock();
        let Some(record) = inner.records.get(key) else {
            return Assessment::Clear;
        };

        let elapsed = now.saturating_duration_since(record.first_attempt_at);
        if record.count < settings.attempt_threshold || elapsed <= settings.deadlock_window {
            return Assessment::Clear;
        }

        let success_ref = inner
            .last_success
            .get(key)
            .copied()
            .unwrap_or(record.first_attempt_at);
        let since_success = now.saturating_duration_since(success_ref);

        if since_success > settings.force_recovery_after {
            Assessment::ForceRecovery {
                attempts: record.count,
                elapsed,
                since_success,
            }
        } else {
            Assessment::Deadlocked {
                attempts: record.count,
                elapsed,
            }
        }
    }

    /// Count an invocation, returning the new attempt count
    pub fn begin(&self, key: &AttemptKey, now: Instant) -> u32 {
        let mut inner = self.lock();
        let record = inner.records.entry(key.clone()).or_insert(AttemptRecord {
            count: 0,
            first_attempt_at: now,
        });
        record.count += 1;
        record.count
    }

    /// Undo the increment of an invocation that was cancelled
    pub fn withdraw(&self, key: &AttemptKey) {
        let mut inner = self.lock();
        if let Some(record) = inner.records.get_mut(key) {
            record.count = record.count.saturating_sub(1);
            if record.count == 0 {
                inner.records.remove(key);
            }
        }
    }

    /// Clear the streak and stamp the success time
    pub fn succeed(&self, key: &AttemptKey, now: Instant) {
        let mut inner = self.lock();
        inner.records.remove(key);
        inner.last_success.insert(key.clone(), now);
    }

    /// Start a fresh streak (after force recovery)
    pub fn reset_streak(&self, key: &AttemptKey) {
        self.lock().records.remove(key);
    }

    pub fn record(&self, key: &AttemptKey) -> Option<AttemptRecord> {
        self.lock().records.get(key).copied()
    }

    pub fn last_success(&self, key: &AttemptKey) -> Option<Instant> {
        self.lock().last_success.get(key).copied()
    }
}
