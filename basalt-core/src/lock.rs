//! Lock objects shared with the dependent engine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cloud::CloudError;

/// Default lock timeout in seconds (15 minutes)
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 900;

/// Contents of a lock object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique identifier for this lock
    pub id: String,
    /// The operation holding the lock (e.g., "handoff", "apply")
    pub operation: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    /// Create a new lock for an operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self::with_timeout(operation, DEFAULT_LOCK_TIMEOUT_SECS)
    }

    /// Create a new lock with a custom timeout
    pub fn with_timeout(operation: impl Into<String>, timeout_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: lock_owner(),
            created: now,
            expires: now + Duration::seconds(timeout_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }

    /// Serialize for storage as a lock object
    pub fn encode(&self) -> Result<Vec<u8>, CloudError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CloudError::Provider(format!("Failed to serialize lock: {}", e)))
    }

    /// Parse a stored lock object
    pub fn decode(bytes: &[u8]) -> Result<Self, CloudError> {
        serde_json::from_slice(bytes)
            .map_err(|e| CloudError::Provider(format!("Failed to parse lock object: {}", e)))
    }

    /// The error reported to someone who finds this lock held
    pub fn held_error(&self) -> CloudError {
        CloudError::Locked {
            lock_id: self.id.clone(),
            who: self.who.clone(),
            operation: self.operation.clone(),
        }
    }
}

/// Lock owner string (username@hostname)
pub(crate) fn lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}
