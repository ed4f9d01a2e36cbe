//! Bootstrap error taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cloud::CloudError;
use crate::config::ConfigError;
use crate::plan::ProvisionStep;
use crate::snapshot::Checksum;
use crate::state::Drift;

/// Errors that abort a bootstrap run
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to read snapshot {path}: {message}")]
    Snapshot { path: String, message: String },

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Access denied during {operation}: {message}")]
    AccessDenied { operation: String, message: String },

    /// The API stayed unreachable after bounded retries
    #[error("Cannot reach the cloud API during {operation}: {source}")]
    Connectivity {
        operation: String,
        source: CloudError,
    },

    #[error("Concurrent bootstrap detected: {operation} conflicted {attempts} times ({last})")]
    ConcurrentBootstrap {
        operation: String,
        attempts: u32,
        last: String,
    },

    /// The store exists but is misconfigured; requires manual remediation
    #[error("Store {store} does not match the backend configuration: {}", join_drift(.drift))]
    Compliance { store: String, drift: Vec<Drift> },

    /// Remote copy of the snapshot did not round-trip; local file is intact
    #[error("Snapshot verification failed: expected {expected}, got {actual}")]
    MigrationVerification { expected: Checksum, actual: Checksum },

    /// Store created but unusable by the dependent engine
    #[error("Handoff validation failed: {0}")]
    HandoffValidation(String),

    #[error("Provisioning step {step} failed: {source}")]
    Provisioning {
        step: ProvisionStep,
        source: CloudError,
    },

    #[error("{operation} failed: {source}")]
    Cloud {
        operation: String,
        source: CloudError,
    },
}

fn join_drift(drift: &[Drift]) -> String {
    drift
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl BootstrapError {
    /// Classify a cloud error raised outside a provisioning step
    pub fn from_cloud(operation: &str, error: CloudError) -> Self {
        match error {
            CloudError::Credentials(message) => Self::Credentials(message),
            CloudError::AccessDenied(message) => Self::AccessDenied {
                operation: operation.to_string(),
                message,
            },
            e @ (CloudError::Connectivity(_) | CloudError::Timeout { .. }) => Self::Connectivity {
                operation: operation.to_string(),
                source: e,
            },
            e => Self::Cloud {
                operation: operation.to_string(),
                source: e,
            },
        }
    }

    /// Classify a cloud error raised by a provisioning step
    pub fn from_step(step: ProvisionStep, error: CloudError) -> Self {
        match error {
            CloudError::Credentials(message) => Self::Credentials(message),
            e @ (CloudError::Connectivity(_) | CloudError::Timeout { .. }) => Self::Connectivity {
                operation: step.to_string(),
                source: e,
            },
            e => Self::Provisioning { step, source: e },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Snapshot { .. } => ErrorKind::Snapshot,
            Self::Credentials(_) => ErrorKind::Credentials,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::Connectivity { .. } => ErrorKind::Connectivity,
            Self::ConcurrentBootstrap { .. } => ErrorKind::ConcurrentBootstrap,
            Self::Compliance { .. } => ErrorKind::Compliance,
            Self::MigrationVerification { .. } => ErrorKind::MigrationVerification,
            Self::HandoffValidation(_) => ErrorKind::HandoffValidation,
            Self::Provisioning { .. } => ErrorKind::Provisioning,
            Self::Cloud { .. } => ErrorKind::Cloud,
        }
    }
}

/// Stable, machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Config,
    Snapshot,
    Credentials,
    AccessDenied,
    Connectivity,
    ConcurrentBootstrap,
    Compliance,
    MigrationVerification,
    HandoffValidation,
    Provisioning,
    Cloud,
}

impl ErrorKind {
    /// Failures that leave the target in a state needing manual inspection
    /// even when this run issued no mutating call
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConcurrentBootstrap
                | ErrorKind::MigrationVerification
                | ErrorKind::HandoffValidation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cloud_classification() {
        let err = BootstrapError::from_cloud("probe", CloudError::Credentials("none".to_string()));
        assert_eq!(err.kind(), ErrorKind::Credentials);

        let err = BootstrapError::from_cloud(
            "probe",
            CloudError::Timeout {
                operation: "probe".to_string(),
                secs: 30,
            },
        );
        assert_eq!(err.kind(), ErrorKind::Connectivity);

        let err = BootstrapError::from_cloud("probe", CloudError::Provider("boom".to_string()));
        assert_eq!(err.kind(), ErrorKind::Cloud);
        assert_eq!(err.to_string(), "probe failed: Provider error: boom");
    }

    #[test]
    fn test_from_step_keeps_step() {
        let err = BootstrapError::from_step(
            ProvisionStep::BlockPublicAccess,
            CloudError::AccessDenied("s3:PutPublicAccessBlock".to_string()),
        );
        match &err {
            BootstrapError::Provisioning { step, .. } => {
                assert_eq!(*step, ProvisionStep::BlockPublicAccess)
            }
            other => panic!("Expected Provisioning error, got {:?}", other),
        }
        assert!(err.to_string().starts_with("Provisioning step block-public-access failed"));
    }

    #[test]
    fn test_compliance_display_lists_drift() {
        let err = BootstrapError::Compliance {
            store: "state-store-1".to_string(),
            drift: vec![Drift::VersioningDisabled, Drift::PublicAccessOpen],
        };
        assert_eq!(
            err.to_string(),
            "Store state-store-1 does not match the backend configuration: versioning is not enabled; public access is not fully blocked"
        );
    }

    #[test]
    fn test_ambiguous_kinds() {
        assert!(ErrorKind::HandoffValidation.is_ambiguous());
        assert!(!ErrorKind::Credentials.is_ambiguous());
        assert!(!ErrorKind::Compliance.is_ambiguous());
    }
}
