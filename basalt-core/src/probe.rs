//! Backend probe: read-only inspection of the remote store

use log::debug;

use crate::cloud::CloudApi;
use crate::error::BootstrapError;
use crate::retry::RetryPolicy;
use crate::spec::BackendSpec;
use crate::state::BackendState;

/// Reads the store's observed state without mutating anything
pub struct BackendProbe<'a> {
    cloud: &'a dyn CloudApi,
    policy: &'a RetryPolicy,
}

impl<'a> BackendProbe<'a> {
    pub fn new(cloud: &'a dyn CloudApi, policy: &'a RetryPolicy) -> Self {
        Self { cloud, policy }
    }

    /// Sample the store's state
    ///
    /// Missing credentials and an unreachable API are errors, never
    /// "does not exist".
    pub async fn probe(&self, spec: &BackendSpec) -> Result<BackendState, BootstrapError> {
        let state = self
            .policy
            .call("probe", || self.cloud.probe(spec))
            .await
            .map_err(|e| BootstrapError::from_cloud("probe", e))?;

        debug!(
            "probe {} via {}: exists={} managed={} versioning={} encryption={} public_access_blocked={} lock_capable={} state_object={}",
            spec.name,
            self.cloud.name(),
            state.exists,
            state.managed,
            state.versioning_enabled,
            state.encryption_enabled,
            state.public_access_blocked,
            state.lock_capable,
            state.state_object_present,
        );

        Ok(state)
    }
}
