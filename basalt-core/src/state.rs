//! Observed state of a candidate store and its drift from the desired configuration

use serde::{Deserialize, Serialize};

use crate::spec::{BackendSpec, EncryptionAlgorithm, PublicAccessPolicy};

/// Tag key placed on stores created by the provisioner
pub const MANAGED_BY_TAG: &str = "managed-by";
/// Tag value placed on stores created by the provisioner
pub const MANAGED_BY_VALUE: &str = "basalt";

/// Observed state of the remote store
///
/// Produced by the probe and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendState {
    pub exists: bool,
    /// Store carries the managed-by marker
    pub managed: bool,
    /// Store has no marker, no tags and no objects, which is what an
    /// interrupted creation leaves behind
    #[serde(default)]
    pub claimable: bool,
    pub versioning_enabled: bool,
    pub encryption_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_algorithm: Option<EncryptionAlgorithm>,
    pub public_access_blocked: bool,
    pub lock_capable: bool,
    /// An object already exists under the configured state key
    pub state_object_present: bool,
    /// ARN of the trust role, if one was requested and found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_role_arn: Option<String>,
    /// Trust role carries the managed-by marker
    #[serde(default)]
    pub trust_role_managed: bool,
}

impl BackendState {
    /// State of a store that does not exist
    pub fn missing() -> Self {
        Self::default()
    }

    /// Every requirement of `spec` this state fails to meet
    pub fn drift(&self, spec: &BackendSpec) -> Vec<Drift> {
        let mut drift = Vec::new();

        if !self.exists {
            drift.push(Drift::StoreMissing);
            drift.extend(self.trust_role_drift(spec));
            return drift;
        }

        if spec.versioning && !self.versioning_enabled {
            drift.push(Drift::VersioningDisabled);
        }

        if spec.encryption.enabled {
            if !self.encryption_enabled {
                drift.push(Drift::EncryptionMissing);
            } else if let Some(actual) = self.encryption_algorithm
                && actual != spec.encryption.algorithm
            {
                drift.push(Drift::EncryptionAlgorithm {
                    expected: spec.encryption.algorithm,
                    actual,
                });
            }
        }

        if spec.public_access == PublicAccessPolicy::DenyAll && !self.public_access_blocked {
            drift.push(Drift::PublicAccessOpen);
        }

        if !self.lock_capable {
            drift.push(Drift::LockUnavailable);
        }

        drift.extend(self.trust_role_drift(spec));

        drift
    }

    fn trust_role_drift(&self, spec: &BackendSpec) -> Option<Drift> {
        spec.trust_role.as_ref()?;
        match &self.trust_role_arn {
            None => Some(Drift::TrustRoleMissing),
            Some(_) if !self.trust_role_managed => Some(Drift::TrustRoleUnmanaged),
            Some(_) => None,
        }
    }

    /// Whether this state fully satisfies `spec`
    pub fn satisfies(&self, spec: &BackendSpec) -> bool {
        self.drift(spec).is_empty()
    }
}

/// A single unmet requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "drift", rename_all = "kebab-case")]
pub enum Drift {
    StoreMissing,
    VersioningDisabled,
    EncryptionMissing,
    EncryptionAlgorithm {
        expected: EncryptionAlgorithm,
        actual: EncryptionAlgorithm,
    },
    PublicAccessOpen,
    LockUnavailable,
    TrustRoleMissing,
    /// A role with the configured name exists but was not created here
    TrustRoleUnmanaged,
}

impl Drift {
    /// Drift in a security-relevant setting of the store itself
    ///
    /// Only this kind of drift is refused on stores the bootstrapper does
    /// not own; a missing trust role is purely additive.
    pub fn is_store_setting(&self) -> bool {
        !matches!(
            self,
            Drift::StoreMissing | Drift::TrustRoleMissing | Drift::TrustRoleUnmanaged
        )
    }
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Drift::StoreMissing => write!(f, "store does not exist"),
            Drift::VersioningDisabled => write!(f, "versioning is not enabled"),
            Drift::EncryptionMissing => write!(f, "default encryption is not configured"),
            Drift::EncryptionAlgorithm { expected, actual } => {
                write!(f, "encryption algorithm is {} (expected {})", actual, expected)
            }
            Drift::PublicAccessOpen => write!(f, "public access is not fully blocked"),
            Drift::LockUnavailable => write!(f, "lock primitive is not usable"),
            Drift::TrustRoleMissing => write!(f, "trust role does not exist"),
            Drift::TrustRoleUnmanaged => {
                write!(f, "trust role exists without the managed-by marker")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::TrustRoleSpec;

    fn compliant() -> BackendState {
        BackendState {
            exists: true,
            managed: true,
            claimable: false,
            versioning_enabled: true,
            encryption_enabled: true,
            encryption_algorithm: Some(EncryptionAlgorithm::Aes256),
            public_access_blocked: true,
            lock_capable: true,
            state_object_present: false,
            trust_role_arn: None,
            trust_role_managed: false,
        }
    }

    #[test]
    fn test_missing_store_drift() {
        let spec = BackendSpec::new("state-store-1", "us-east-1");
        assert_eq!(BackendState::missing().drift(&spec), vec![Drift::StoreMissing]);
    }

    #[test]
    fn test_compliant_state_satisfies() {
        let spec = BackendSpec::new("state-store-1", "us-east-1");
        assert!(compliant().satisfies(&spec));
    }

    #[test]
    fn test_partial_compliance_is_not_satisfied() {
        let spec = BackendSpec::new("state-store-1", "us-east-1");
        let state = BackendState {
            encryption_enabled: false,
            encryption_algorithm: None,
            ..compliant()
        };
        assert_eq!(state.drift(&spec), vec![Drift::EncryptionMissing]);
        assert!(!state.satisfies(&spec));
    }

    #[test]
    fn test_wrong_encryption_algorithm() {
        let mut spec = BackendSpec::new("state-store-1", "us-east-1");
        spec.encryption.algorithm = EncryptionAlgorithm::AwsKms;
        let drift = compliant().drift(&spec);
        assert_eq!(
            drift,
            vec![Drift::EncryptionAlgorithm {
                expected: EncryptionAlgorithm::AwsKms,
                actual: EncryptionAlgorithm::Aes256,
            }]
        );
    }

    #[test]
    fn test_relaxed_spec_ignores_unrequired_settings() {
        let mut spec = BackendSpec::new("state-store-1", "us-east-1");
        spec.versioning = false;
        spec.encryption.enabled = false;
        spec.public_access = PublicAccessPolicy::Unmanaged;
        let state = BackendState {
            exists: true,
            lock_capable: true,
            ..BackendState::default()
        };
        assert!(state.satisfies(&spec));
    }

    #[test]
    fn test_trust_role_drift_is_not_a_store_setting() {
        let mut spec = BackendSpec::new("state-store-1", "us-east-1");
        spec.trust_role = Some(TrustRoleSpec {
            name: "ci".to_string(),
            federated_provider_arn: "arn:aws:iam::1:oidc-provider/x".to_string(),
            subjects: vec!["repo:a/b:*".to_string()],
            audience: "sts.amazonaws.com".to_string(),
        });
        let drift = compliant().drift(&spec);
        assert_eq!(drift, vec![Drift::TrustRoleMissing]);
        assert!(!drift[0].is_store_setting());
        assert!(Drift::PublicAccessOpen.is_store_setting());
    }

    #[test]
    fn test_foreign_trust_role_is_drift() {
        let mut spec = BackendSpec::new("state-store-1", "us-east-1");
        spec.trust_role = Some(TrustRoleSpec::new(
            "ci",
            "arn:aws:iam::1:oidc-provider/token.actions.githubusercontent.com",
            vec!["repo:a/b:*".to_string()],
        ));
        let foreign = BackendState {
            trust_role_arn: Some("arn:aws:iam::1:role/ci".to_string()),
            ..compliant()
        };
        assert_eq!(foreign.drift(&spec), vec![Drift::TrustRoleUnmanaged]);
        assert!(!Drift::TrustRoleUnmanaged.is_store_setting());

        let ours = BackendState {
            trust_role_managed: true,
            ..foreign
        };
        assert!(ours.satisfies(&spec));
    }

    #[test]
    fn test_drift_serialization() {
        let json = serde_json::to_value(Drift::PublicAccessOpen).unwrap();
        assert_eq!(json, serde_json::json!({ "drift": "public-access-open" }));
    }
}
