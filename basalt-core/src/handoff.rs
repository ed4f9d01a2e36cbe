//! Handoff validation: prove the dependent engine can lock, read and unlock

use log::{info, warn};

use crate::bootstrap::RunContext;
use crate::cloud::{CloudApi, CloudError, StoreId};
use crate::error::BootstrapError;
use crate::lock::LockInfo;
use crate::probe::BackendProbe;
use crate::result::HandoffOutputs;
use crate::retry::RetryPolicy;
use crate::spec::BackendSpec;

/// Operation name recorded in the lock taken by the validator
pub const HANDOFF_OPERATION: &str = "basalt-handoff";

/// Identifiers handed to downstream configuration
pub fn handoff_outputs(spec: &BackendSpec, trust_role_arn: Option<String>) -> HandoffOutputs {
    HandoffOutputs {
        store_locator: spec.name.clone(),
        region: spec.normalized_region(),
        state_key: spec.state_key.clone(),
        lock_resource_locator: format!("{}/{}", spec.name, spec.lock_key()),
        encrypt: spec.encryption.enabled,
        kms_key_id: spec.encryption.kms_key_id.clone(),
        trust_role_arn,
    }
}

pub struct HandoffValidator<'a> {
    cloud: &'a dyn CloudApi,
    policy: &'a RetryPolicy,
}

impl<'a> HandoffValidator<'a> {
    pub fn new(cloud: &'a dyn CloudApi, policy: &'a RetryPolicy) -> Self {
        Self { cloud, policy }
    }

    /// Re-sample the store, then lock, read and unlock it the way the
    /// dependent engine will
    pub async fn validate(
        &self,
        spec: &BackendSpec,
        store: &StoreId,
        expect_state_object: bool,
        ctx: &mut RunContext,
    ) -> Result<HandoffOutputs, BootstrapError> {
        let state = BackendProbe::new(self.cloud, self.policy)
            .probe(spec)
            .await?;
        ctx.observed = Some(state.clone());

        let drift = state.drift(spec);
        if !drift.is_empty() {
            let reasons: Vec<String> = drift.iter().map(|d| d.to_string()).collect();
            return Err(BootstrapError::HandoffValidation(format!(
                "{} still drifts after provisioning: {}",
                spec.name,
                reasons.join("; ")
            )));
        }
        if expect_state_object && !state.state_object_present {
            return Err(BootstrapError::HandoffValidation(format!(
                "state object {}/{} is missing after migration",
                spec.name, spec.state_key
            )));
        }

        let lock_key = spec.lock_key();
        let lock = self.acquire(store, &lock_key, ctx).await?;

        if state.state_object_present
            && let Err(e) = self
                .policy
                .call("read_object", || {
                    self.cloud.read_object(store, &spec.state_key)
                })
                .await
        {
            if let Err(release) = self.release(store, &lock_key, &lock).await {
                warn!("failed to release handoff lock {}: {}", lock.id, release);
            }
            return Err(BootstrapError::HandoffValidation(e.to_string()));
        }

        self.release(store, &lock_key, &lock)
            .await
            .map_err(|e| BootstrapError::HandoffValidation(e.to_string()))?;

        info!("{} accepted lock/read/unlock probe", spec.name);
        Ok(handoff_outputs(spec, state.trust_role_arn))
    }

    async fn acquire(
        &self,
        store: &StoreId,
        lock_key: &str,
        ctx: &mut RunContext,
    ) -> Result<LockInfo, BootstrapError> {
        let mut attempt = 1;
        loop {
            ctx.mutated = true;
            let error = match self
                .policy
                .call("acquire_lock", || {
                    self.cloud.acquire_lock(store, lock_key, HANDOFF_OPERATION)
                })
                .await
            {
                Ok(lock) => return Ok(lock),
                Err(e) if e.is_conflict() => e,
                Err(e) => return Err(BootstrapError::HandoffValidation(e.to_string())),
            };

            if attempt >= self.policy.max_attempts {
                return Err(BootstrapError::ConcurrentBootstrap {
                    operation: "acquire_lock".to_string(),
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            let delay = self.policy.backoff(attempt);
            warn!("{}; retrying in {:?}", error, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn release(
        &self,
        store: &StoreId,
        lock_key: &str,
        lock: &LockInfo,
    ) -> Result<(), CloudError> {
        self.policy
            .call("release_lock", || self.cloud.release_lock(store, lock_key, lock))
            .await
    }
}
