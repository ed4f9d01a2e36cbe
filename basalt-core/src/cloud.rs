//! Cloud provider capability trait and error types

use async_trait::async_trait;
use thiserror::Error;

use crate::lock::LockInfo;
use crate::snapshot::Checksum;
use crate::spec::{BackendSpec, EncryptionAlgorithm, TrustRoleSpec};
use crate::state::BackendState;

/// Errors returned by a cloud provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// Credentials are missing, expired or rejected
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// The API could not be reached or answered with a server-side failure
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// A call did not complete within its timeout
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Another actor is modifying the same resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The lock is held by someone else
    #[error("State is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    #[error("Lock not found: {0}")]
    LockNotFound(String),

    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller is authenticated but not allowed to perform the call
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The store name is owned by somebody else
    #[error("Store name is not available: {0}")]
    NameUnavailable(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

impl CloudError {
    /// Errors worth retrying locally with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Connectivity(_) | CloudError::Timeout { .. })
    }

    /// Errors that indicate a concurrent actor
    pub fn is_conflict(&self) -> bool {
        matches!(self, CloudError::Conflict(_) | CloudError::Locked { .. })
    }
}

pub type CloudResult<T> = Result<T, CloudError>;

/// Identifier of a created store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreId(pub String);

impl StoreId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single configuration change applied to an existing store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSetting {
    Versioning,
    Encryption {
        algorithm: EncryptionAlgorithm,
        kms_key_id: Option<String>,
    },
    PublicAccessBlock,
}

/// A trust role after `ensure_trust_role`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRole {
    pub arn: String,
    /// The role did not exist before this call
    pub created: bool,
}

/// Capabilities the bootstrapper needs from a cloud provider
///
/// Implementations receive their credentials at construction time and
/// must not consult process-wide state afterwards. Every method is
/// expected to be idempotent for resources the caller itself created.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Name of this provider (e.g., "aws", "local")
    fn name(&self) -> &'static str;

    /// Read the store's existence and configuration. Never mutates.
    async fn probe(&self, spec: &BackendSpec) -> CloudResult<BackendState>;

    /// Create the store and place the managed-by marker on it
    ///
    /// An existing store owned by the caller is accepted when it carries
    /// the marker, or when it has no tags and no objects, in which case the
    /// marker is placed now. Any other existing store is a `Conflict`.
    async fn create_store(&self, spec: &BackendSpec) -> CloudResult<StoreId>;

    /// Apply one configuration setting to the store
    async fn configure_store(&self, id: &StoreId, setting: &StoreSetting) -> CloudResult<()>;

    /// Write an object and return the checksum the store computed for it
    async fn write_object(&self, id: &StoreId, key: &str, bytes: &[u8]) -> CloudResult<Checksum>;

    /// Read an object back
    async fn read_object(&self, id: &StoreId, key: &str) -> CloudResult<Vec<u8>>;

    /// Delete an object
    async fn delete_object(&self, id: &StoreId, key: &str) -> CloudResult<()>;

    /// Acquire the lock stored under `lock_key`
    ///
    /// Fails with `CloudError::Locked` if an unexpired lock is held.
    async fn acquire_lock(
        &self,
        id: &StoreId,
        lock_key: &str,
        operation: &str,
    ) -> CloudResult<LockInfo>;

    /// Release a previously acquired lock, verifying it is still ours
    async fn release_lock(
        &self,
        id: &StoreId,
        lock_key: &str,
        lock: &LockInfo,
    ) -> CloudResult<()>;

    /// Remove a lock by id regardless of owner
    async fn force_unlock(&self, id: &StoreId, lock_key: &str, lock_id: &str) -> CloudResult<()>;

    /// Create the trust role, or reuse one carrying the managed-by marker,
    /// and grant it access to the store
    ///
    /// A role with the same name but without the marker is a `Conflict`
    /// and is left untouched.
    async fn ensure_trust_role(
        &self,
        id: &StoreId,
        role: &TrustRoleSpec,
    ) -> CloudResult<TrustRole>;
}
