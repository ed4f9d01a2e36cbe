//! Outcome of a bootstrap run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, ErrorKind};
use crate::plan::ProvisionStep;
use crate::state::BackendState;

/// Phases of a bootstrap run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Start,
    Probing,
    Provisioning,
    Migrating,
    Validating,
    AlreadySatisfied,
    Provisioned,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::AlreadySatisfied | Phase::Provisioned | Phase::Failed
        )
    }

    /// Allowed transitions; no phase is re-entered within a run
    pub fn can_transition_to(&self, next: Phase) -> bool {
        if next == Phase::Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Phase::Start, Phase::Probing)
                | (Phase::Probing, Phase::AlreadySatisfied)
                | (Phase::Probing, Phase::Provisioning)
                | (Phase::Provisioning, Phase::Migrating)
                | (Phase::Migrating, Phase::Validating)
                | (Phase::Validating, Phase::Provisioned)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Start => "start",
            Phase::Probing => "probing",
            Phase::Provisioning => "provisioning",
            Phase::Migrating => "migrating",
            Phase::Validating => "validating",
            Phase::AlreadySatisfied => "already-satisfied",
            Phase::Provisioned => "provisioned",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootstrapStatus {
    AlreadySatisfied,
    Provisioned,
    Failed,
}

impl BootstrapStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, BootstrapStatus::Failed)
    }
}

/// Identifiers the dependent engine's backend configuration needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffOutputs {
    pub store_locator: String,
    pub region: String,
    pub state_key: String,
    pub lock_resource_locator: String,
    pub encrypt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_role_arn: Option<String>,
}

impl HandoffOutputs {
    /// `key = "value"` lines accepted by the engine's `-backend-config` flag
    pub fn backend_config(&self) -> String {
        let mut lines = vec![
            format!("bucket = \"{}\"", self.store_locator),
            format!("key = \"{}\"", self.state_key),
            format!("region = \"{}\"", self.region),
            format!("encrypt = {}", self.encrypt),
            "use_lockfile = true".to_string(),
        ];
        if let Some(kms_key_id) = &self.kms_key_id {
            lines.push(format!("kms_key_id = \"{}\"", kms_key_id));
        }
        if let Some(role_arn) = &self.trust_role_arn {
            lines.push(format!("role_arn = \"{}\"", role_arn));
        }
        lines.join("\n") + "\n"
    }
}

/// Why a run failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Phase the run was in when it failed
    pub phase: Phase,
    /// Provisioning sub-step that failed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<ProvisionStep>,
    pub kind: ErrorKind,
    /// Underlying cause, verbatim
    pub cause: String,
    /// Last state observed before the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_state: Option<BackendState>,
}

impl FailureReport {
    pub fn new(
        phase: Phase,
        step: Option<ProvisionStep>,
        error: &BootstrapError,
        observed_state: Option<BackendState>,
    ) -> Self {
        Self {
            phase,
            step,
            kind: error.kind(),
            cause: error.to_string(),
            observed_state,
        }
    }
}

/// Terminal artifact of one bootstrap invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapResult {
    pub run_id: String,
    pub store: String,
    pub status: BootstrapStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<HandoffOutputs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    /// Phase trace, starting with `start`
    pub phases: Vec<Phase>,
    /// Provisioning sub-steps that completed, in order
    #[serde(default)]
    pub steps: Vec<ProvisionStep>,
    /// Resources this run created (for operator cleanup after a failure)
    #[serde(default)]
    pub created: Vec<String>,
    /// Whether any mutating call was issued
    pub mutated: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Process exit code for success
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code for a failure the operator can fix and simply re-run
pub const EXIT_FAILED: i32 = 1;
/// Process exit code for a failure that needs manual inspection
pub const EXIT_NEEDS_INSPECTION: i32 = 2;

impl BootstrapResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn exit_code(&self) -> i32 {
        match &self.failure {
            None if self.is_success() => EXIT_SUCCESS,
            Some(failure) if self.mutated || failure.kind.is_ambiguous() => {
                EXIT_NEEDS_INSPECTION
            }
            _ => EXIT_FAILED,
        }
    }
}
