//! Backend provisioner: creates and configures the store in dependency order

use log::{info, warn};

use crate::bootstrap::RunContext;
use crate::cloud::{CloudApi, StoreId, StoreSetting};
use crate::error::BootstrapError;
use crate::plan::{ProvisionPlan, ProvisionStep};
use crate::probe::BackendProbe;
use crate::retry::RetryPolicy;
use crate::spec::BackendSpec;
use crate::state::{BackendState, Drift};

pub struct Provisioner<'a> {
    cloud: &'a dyn CloudApi,
    policy: &'a RetryPolicy,
}

impl<'a> Provisioner<'a> {
    pub fn new(cloud: &'a dyn CloudApi, policy: &'a RetryPolicy) -> Self {
        Self { cloud, policy }
    }

    /// Bring the store in line with `spec`, starting from `observed`
    ///
    /// Security-relevant settings of a store that does not carry the
    /// managed-by marker are never touched, unless the store is empty and
    /// untagged and gets claimed first. A trust role without the marker is
    /// never touched. Nothing is torn down on failure.
    pub async fn provision(
        &self,
        spec: &BackendSpec,
        observed: &BackendState,
        ctx: &mut RunContext,
    ) -> Result<StoreId, BootstrapError> {
        let plan = ProvisionPlan::for_state(spec, observed);
        let drift = observed.drift(spec);

        if drift.contains(&Drift::TrustRoleUnmanaged) {
            return Err(BootstrapError::Compliance {
                store: spec.name.clone(),
                drift: vec![Drift::TrustRoleUnmanaged],
            });
        }

        if observed.exists && !observed.managed && !observed.claimable && plan.mutates_store() {
            return Err(BootstrapError::Compliance {
                store: spec.name.clone(),
                drift: drift.into_iter().filter(Drift::is_store_setting).collect(),
            });
        }

        let store = StoreId::new(&spec.name);

        if plan.is_empty() {
            info!("{} needs no provisioning", spec.name);
        }

        for step in plan.steps() {
            ctx.step = Some(*step);
            info!("{}: {}", spec.name, step);
            match step {
                ProvisionStep::CreateStore => {
                    if observed.exists {
                        info!("{} is empty and unmarked; claiming it", spec.name);
                    }
                    self.create_store(spec, !observed.exists, ctx).await?;
                }
                ProvisionStep::ConfigureVersioning => {
                    self.configure(&store, *step, StoreSetting::Versioning, ctx)
                        .await?;
                }
                ProvisionStep::ConfigureEncryption => {
                    let setting = StoreSetting::Encryption {
                        algorithm: spec.encryption.algorithm,
                        kms_key_id: spec.encryption.kms_key_id.clone(),
                    };
                    self.configure(&store, *step, setting, ctx).await?;
                }
                ProvisionStep::BlockPublicAccess => {
                    self.configure(&store, *step, StoreSetting::PublicAccessBlock, ctx)
                        .await?;
                }
                ProvisionStep::CreateTrustRole => {
                    if let Some(role) = &spec.trust_role {
                        ctx.mutated = true;
                        let ensured = self
                            .policy
                            .call("ensure_trust_role", || {
                                self.cloud.ensure_trust_role(&store, role)
                            })
                            .await
                            .map_err(|e| BootstrapError::from_step(*step, e))?;
                        if ensured.created {
                            ctx.created.push(format!("trust-role:{}", ensured.arn));
                        }
                    }
                }
            }
            ctx.applied.push(*step);
        }
        ctx.step = None;

        Ok(store)
    }

    async fn configure(
        &self,
        store: &StoreId,
        step: ProvisionStep,
        setting: StoreSetting,
        ctx: &mut RunContext,
    ) -> Result<(), BootstrapError> {
        ctx.mutated = true;
        self.policy
            .call(step.as_str(), || self.cloud.configure_store(store, &setting))
            .await
            .map_err(|e| BootstrapError::from_step(step, e))
    }

    /// Create (or claim) the store, re-probing after each conflict with
    /// another actor until the store carries the managed-by marker
    async fn create_store(
        &self,
        spec: &BackendSpec,
        record_created: bool,
        ctx: &mut RunContext,
    ) -> Result<StoreId, BootstrapError> {
        let mut attempt = 1;
        loop {
            ctx.mutated = true;
            let error = match self
                .policy
                .call("create_store", || self.cloud.create_store(spec))
                .await
            {
                Ok(id) => {
                    // After a conflict the store may well be someone else's
                    if record_created && attempt == 1 {
                        ctx.created.push(format!("store:{}", id));
                    }
                    return Ok(id);
                }
                Err(e) if e.is_conflict() => e,
                Err(e) => return Err(BootstrapError::from_step(ProvisionStep::CreateStore, e)),
            };

            if attempt >= self.policy.max_attempts {
                return Err(BootstrapError::ConcurrentBootstrap {
                    operation: "create_store".to_string(),
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                "create_store conflicted (attempt {}/{}): {}; re-probing in {:?}",
                attempt, self.policy.max_attempts, error, delay
            );
            tokio::time::sleep(delay).await;

            let state = BackendProbe::new(self.cloud, self.policy)
                .probe(spec)
                .await?;
            ctx.observed = Some(state.clone());
            if state.exists && state.managed {
                info!("{} was created concurrently; converging", spec.name);
                return Ok(StoreId::new(&spec.name));
            }
            if state.exists {
                warn!("{} exists without the managed-by marker yet", spec.name);
            }

            attempt += 1;
        }
    }
}
