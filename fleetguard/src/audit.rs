//! Append-only operation log
//!
//! One JSON object per line. Written for operators; never read back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::filesys::file::File;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub key: String,
    pub action: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Audit log sink; `None` file disables writing
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    file: Option<File>,
}

impl AuditLog {
    pub fn new(file: File) -> Self {
        Self { file: Some(file) }
    }

    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Append an entry; failures are logged and otherwise ignored
    pub async fn record(&self, key: &str, action: &str, outcome: &str, detail: Option<String>) {
        let Some(file) = &self.file else {
            return;
        };

        let entry = AuditEntry {
            timestamp: Utc::now(),
            key: key.to_string(),
            action: action.to_string(),
            outcome: outcome.to_string(),
            detail,
        };

        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize audit entry: {}", e);
                return;
            }
        };
        if let Err(e) = file.append_line(&line).await {
            warn!("Failed to write audit log {}: {}", file.path().display(), e);
        }
    }
}
