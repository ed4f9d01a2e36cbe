//! Provisioning sub-steps and their ordering

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::spec::{BackendSpec, PublicAccessPolicy};
use crate::state::{BackendState, Drift};

/// A single provisioning sub-step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStep {
    CreateStore,
    ConfigureVersioning,
    ConfigureEncryption,
    BlockPublicAccess,
    CreateTrustRole,
}

impl ProvisionStep {
    /// Declaration order, used to break ties between independent steps
    pub const ALL: [ProvisionStep; 5] = [
        ProvisionStep::CreateStore,
        ProvisionStep::ConfigureVersioning,
        ProvisionStep::ConfigureEncryption,
        ProvisionStep::BlockPublicAccess,
        ProvisionStep::CreateTrustRole,
    ];

    /// Steps that must run before this one when both are planned
    ///
    /// Public access is locked down last among the store settings so the
    /// configuration calls never run under the stricter policy.
    pub fn depends_on(&self) -> &'static [ProvisionStep] {
        match self {
            ProvisionStep::CreateStore => &[],
            ProvisionStep::ConfigureVersioning => &[ProvisionStep::CreateStore],
            ProvisionStep::ConfigureEncryption => &[ProvisionStep::CreateStore],
            ProvisionStep::BlockPublicAccess => &[
                ProvisionStep::CreateStore,
                ProvisionStep::ConfigureVersioning,
                ProvisionStep::ConfigureEncryption,
            ],
            ProvisionStep::CreateTrustRole => {
                &[ProvisionStep::CreateStore, ProvisionStep::BlockPublicAccess]
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStep::CreateStore => "create-store",
            ProvisionStep::ConfigureVersioning => "configure-versioning",
            ProvisionStep::ConfigureEncryption => "configure-encryption",
            ProvisionStep::BlockPublicAccess => "block-public-access",
            ProvisionStep::CreateTrustRole => "create-trust-role",
        }
    }
}

impl std::fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered list of steps needed to bring a store in line with its spec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionPlan {
    steps: Vec<ProvisionStep>,
}

impl ProvisionPlan {
    /// Plan the steps whose requirement `state` does not meet
    pub fn for_state(spec: &BackendSpec, state: &BackendState) -> Self {
        let drift = state.drift(spec);
        let mut needed = HashSet::new();

        if !state.exists {
            needed.insert(ProvisionStep::CreateStore);
            if spec.versioning {
                needed.insert(ProvisionStep::ConfigureVersioning);
            }
            if spec.encryption.enabled {
                needed.insert(ProvisionStep::ConfigureEncryption);
            }
            if spec.public_access == PublicAccessPolicy::DenyAll {
                needed.insert(ProvisionStep::BlockPublicAccess);
            }
        }

        if state.exists
            && !state.managed
            && state.claimable
            && drift.iter().any(Drift::is_store_setting)
        {
            // Finish a creation that stopped before the marker was placed
            needed.insert(ProvisionStep::CreateStore);
        }

        for d in &drift {
            match d {
                Drift::StoreMissing | Drift::LockUnavailable | Drift::TrustRoleUnmanaged => {}
                Drift::VersioningDisabled => {
                    needed.insert(ProvisionStep::ConfigureVersioning);
                }
                Drift::EncryptionMissing | Drift::EncryptionAlgorithm { .. } => {
                    needed.insert(ProvisionStep::ConfigureEncryption);
                }
                Drift::PublicAccessOpen => {
                    needed.insert(ProvisionStep::BlockPublicAccess);
                }
                Drift::TrustRoleMissing => {
                    needed.insert(ProvisionStep::CreateTrustRole);
                }
            }
        }

        Self {
            steps: sort_steps(&needed),
        }
    }

    pub fn steps(&self) -> &[ProvisionStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether this plan touches the store's own settings
    pub fn mutates_store(&self) -> bool {
        self.steps
            .iter()
            .any(|s| *s != ProvisionStep::CreateTrustRole)
    }
}

/// Topologically sort steps by their dependencies, keeping declaration order
/// among independent steps. Dependencies outside `needed` are already met.
fn sort_steps(needed: &HashSet<ProvisionStep>) -> Vec<ProvisionStep> {
    fn visit(
        step: ProvisionStep,
        needed: &HashSet<ProvisionStep>,
        visited: &mut HashSet<ProvisionStep>,
        sorted: &mut Vec<ProvisionStep>,
    ) {
        if !visited.insert(step) {
            return;
        }
        for dep in step.depends_on() {
            if needed.contains(dep) {
                visit(*dep, needed, visited, sorted);
            }
        }
        sorted.push(step);
    }

    let mut sorted = Vec::new();
    let mut visited = HashSet::new();
    for step in ProvisionStep::ALL {
        if needed.contains(&step) {
            visit(step, needed, &mut visited, &mut sorted);
        }
    }
    sorted
}
