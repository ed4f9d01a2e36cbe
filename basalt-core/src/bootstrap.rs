//! The bootstrap run: probe, provision, migrate, validate
//!
//! ```text
//! start → probing → (already-satisfied | provisioning → migrating → validating → provisioned)
//!       ↘ failed (from any non-terminal phase)
//! ```

use std::path::PathBuf;

use chrono::Utc;
use log::{error, info};

use crate::cloud::CloudApi;
use crate::error::BootstrapError;
use crate::handoff::{HandoffValidator, handoff_outputs};
use crate::migrator::Migrator;
use crate::plan::ProvisionStep;
use crate::probe::BackendProbe;
use crate::provisioner::Provisioner;
use crate::result::{BootstrapResult, BootstrapStatus, FailureReport, HandoffOutputs, Phase};
use crate::retry::RetryPolicy;
use crate::snapshot::StateSnapshot;
use crate::spec::BackendSpec;
use crate::state::BackendState;

/// Mutable bookkeeping threaded through the components of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub phase: Phase,
    pub phases: Vec<Phase>,
    /// Provisioning sub-step in progress
    pub step: Option<ProvisionStep>,
    /// Provisioning sub-steps that completed
    pub applied: Vec<ProvisionStep>,
    /// Last sampled state
    pub observed: Option<BackendState>,
    pub mutated: bool,
    pub created: Vec<String>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            phase: Phase::Start,
            phases: vec![Phase::Start],
            step: None,
            applied: Vec::new(),
            observed: None,
            mutated: false,
            created: Vec::new(),
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid transition {} -> {}",
            self.phase,
            next
        );
        info!("{} -> {}", self.phase, next);
        self.phase = next;
        self.phases.push(next);
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot bootstrapper for a single backend
pub struct Bootstrapper<'a> {
    cloud: &'a dyn CloudApi,
    spec: &'a BackendSpec,
    snapshot_path: Option<PathBuf>,
    policy: RetryPolicy,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(cloud: &'a dyn CloudApi, spec: &'a BackendSpec) -> Self {
        Self {
            cloud,
            spec,
            snapshot_path: None,
            policy: RetryPolicy::default(),
        }
    }

    /// Migrate the local state file at `path` into the new store
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the bootstrap to a terminal phase
    ///
    /// Never panics on cloud failures; every error ends up in the result.
    pub async fn run(&self) -> BootstrapResult {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut ctx = RunContext::new();

        info!(
            "bootstrap {} for {} via {}",
            run_id,
            self.spec.name,
            self.cloud.name()
        );

        let (status, outputs, failure) = match self.execute(&mut ctx).await {
            Ok((status, outputs)) => (status, Some(outputs), None),
            Err(e) => {
                let failed_in = ctx.phase;
                error!("bootstrap failed during {}: {}", failed_in, e);
                ctx.advance(Phase::Failed);
                let report = FailureReport::new(failed_in, ctx.step, &e, ctx.observed.clone());
                (BootstrapStatus::Failed, None, Some(report))
            }
        };

        BootstrapResult {
            run_id,
            store: self.spec.name.clone(),
            status,
            outputs,
            failure,
            phases: ctx.phases,
            steps: ctx.applied,
            created: ctx.created,
            mutated: ctx.mutated,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
    ) -> Result<(BootstrapStatus, HandoffOutputs), BootstrapError> {
        self.spec.validate()?;
        let snapshot = self.load_snapshot()?;

        ctx.advance(Phase::Probing);
        let probe = BackendProbe::new(self.cloud, &self.policy);
        let state = probe.probe(self.spec).await?;
        ctx.observed = Some(state.clone());

        let needs_migration = snapshot.is_some() && !state.state_object_present;
        if state.satisfies(self.spec) && !needs_migration {
            ctx.advance(Phase::AlreadySatisfied);
            return Ok((
                BootstrapStatus::AlreadySatisfied,
                handoff_outputs(self.spec, state.trust_role_arn),
            ));
        }

        ctx.advance(Phase::Provisioning);
        let store = Provisioner::new(self.cloud, &self.policy)
            .provision(self.spec, &state, ctx)
            .await?;

        let state = probe.probe(self.spec).await?;
        ctx.observed = Some(state.clone());
        let drift = state.drift(self.spec);
        if !drift.is_empty() {
            return Err(BootstrapError::Compliance {
                store: self.spec.name.clone(),
                drift,
            });
        }

        ctx.advance(Phase::Migrating);
        Migrator::new(self.cloud, &self.policy)
            .migrate(
                &store,
                self.spec,
                snapshot.as_ref(),
                state.state_object_present,
                ctx,
            )
            .await?;

        ctx.advance(Phase::Validating);
        let outputs = HandoffValidator::new(self.cloud, &self.policy)
            .validate(self.spec, &store, snapshot.is_some(), ctx)
            .await?;

        ctx.advance(Phase::Provisioned);
        Ok((BootstrapStatus::Provisioned, outputs))
    }

    fn load_snapshot(&self) -> Result<Option<StateSnapshot>, BootstrapError> {
        self.snapshot_path
            .as_ref()
            .map(|path| {
                StateSnapshot::load(path).map_err(|e| BootstrapError::Snapshot {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }
}
