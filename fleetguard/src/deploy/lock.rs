//! Per-target exclusive locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::errors::GuardError;

/// One async mutex per target; a pipeline holds its target's guard for the whole run
pub struct TargetLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
}

impl TargetLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Acquire the lock for `target`, failing fast after the configured timeout
    pub async fn acquire(&self, target: &str) -> Result<OwnedMutexGuard<()>, GuardError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => {
                debug!("Acquired deployment lock for {}", target);
                Ok(guard)
            }
            Err(_) => Err(GuardError::LockTimeout {
                target: target.to_string(),
            }),
        }
    }
}
