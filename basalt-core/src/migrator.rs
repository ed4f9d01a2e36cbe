//! Local-to-remote snapshot migration with checksum verification

use log::{info, warn};

use crate::bootstrap::RunContext;
use crate::cloud::{CloudApi, StoreId};
use crate::error::BootstrapError;
use crate::retry::RetryPolicy;
use crate::snapshot::{Checksum, StateSnapshot};
use crate::spec::BackendSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Snapshot copied and verified
    Migrated { key: String, checksum: Checksum },
    /// No snapshot was configured
    NoSnapshot,
    /// The store already holds a state object; it is never overwritten
    RemotePresent,
}

pub struct Migrator<'a> {
    cloud: &'a dyn CloudApi,
    policy: &'a RetryPolicy,
}

impl<'a> Migrator<'a> {
    pub fn new(cloud: &'a dyn CloudApi, policy: &'a RetryPolicy) -> Self {
        Self { cloud, policy }
    }

    /// Copy `snapshot` to the configured state key and verify it round-trips
    ///
    /// The local file is only ever read. On a checksum mismatch the remote
    /// object this call wrote is removed again.
    pub async fn migrate(
        &self,
        store: &StoreId,
        spec: &BackendSpec,
        snapshot: Option<&StateSnapshot>,
        remote_present: bool,
        ctx: &mut RunContext,
    ) -> Result<MigrationOutcome, BootstrapError> {
        let Some(snapshot) = snapshot else {
            info!("no local snapshot configured; skipping migration");
            return Ok(MigrationOutcome::NoSnapshot);
        };

        if remote_present {
            warn!(
                "{}/{} already exists; local snapshot {} was not migrated",
                store,
                spec.state_key,
                snapshot.path().display()
            );
            return Ok(MigrationOutcome::RemotePresent);
        }

        let key = spec.state_key.as_str();
        let expected = snapshot.checksum();
        info!(
            "migrating {} ({} bytes, {}) to {}/{}",
            snapshot.path().display(),
            snapshot.len(),
            expected,
            store,
            key
        );

        ctx.mutated = true;
        let reported = self
            .policy
            .call("write_object", || {
                self.cloud.write_object(store, key, snapshot.bytes())
            })
            .await
            .map_err(|e| BootstrapError::from_cloud("write_object", e))?;

        if &reported != expected {
            return Err(self.rollback(store, key, expected, reported, ctx).await);
        }

        let read_back = self
            .policy
            .call("read_object", || self.cloud.read_object(store, key))
            .await
            .map_err(|e| BootstrapError::from_cloud("read_object", e))?;
        let actual = Checksum::of(&read_back);

        if &actual != expected {
            return Err(self.rollback(store, key, expected, actual, ctx).await);
        }

        ctx.created.push(format!("object:{}/{}", store, key));
        Ok(MigrationOutcome::Migrated {
            key: key.to_string(),
            checksum: actual,
        })
    }

    /// Remove the unverified remote copy and build the verification error
    async fn rollback(
        &self,
        store: &StoreId,
        key: &str,
        expected: &Checksum,
        actual: Checksum,
        ctx: &mut RunContext,
    ) -> BootstrapError {
        warn!(
            "checksum mismatch for {}/{}: expected {}, got {}; removing remote copy",
            store, key, expected, actual
        );
        if let Err(e) = self
            .policy
            .call("delete_object", || self.cloud.delete_object(store, key))
            .await
        {
            warn!("failed to remove unverified object {}/{}: {}", store, key, e);
            ctx.created.push(format!("object:{}/{}", store, key));
        }
        BootstrapError::MigrationVerification {
            expected: expected.clone(),
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{Call, MockCloud};
    use std::path::PathBuf;

    fn setup() -> (MockCloud, BackendSpec, StateSnapshot) {
        let spec = BackendSpec::new("state-store-1", "us-east-1");
        let cloud = MockCloud::with_compliant_store(&spec);
        let snapshot = StateSnapshot::from_bytes(
            PathBuf::from("terraform.tfstate"),
            br#"{"version":4,"serial":7}"#.to_vec(),
        );
        (cloud, spec, snapshot)
    }

    #[tokio::test]
    async fn test_migrate_and_verify() {
        let (cloud, spec, snapshot) = setup();
        let policy = RetryPolicy::default();
        let mut ctx = RunContext::new();
        let store = StoreId::new(&spec.name);

        let outcome = Migrator::new(&cloud, &policy)
            .migrate(&store, &spec, Some(&snapshot), false, &mut ctx)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                key: spec.state_key.clone(),
                checksum: snapshot.checksum().clone(),
            }
        );
        assert_eq!(
            cloud.calls(),
            vec![
                Call::WriteObject(spec.state_key.clone()),
                Call::ReadObject(spec.state_key.clone()),
            ]
        );
        let stored = cloud.store().unwrap().objects[&spec.state_key].clone();
        assert_eq!(stored, snapshot.bytes());
    }

    #[tokio::test]
    async fn test_mismatch_rolls_back_remote_copy() {
        let (cloud, spec, snapshot) = setup();
        cloud.corrupt_writes();
        let policy = RetryPolicy::default();
        let mut ctx = RunContext::new();
        let store = StoreId::new(&spec.name);

        let err = Migrator::new(&cloud, &policy)
            .migrate(&store, &spec, Some(&snapshot), false, &mut ctx)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MigrationVerification);
        assert!(
            cloud
                .calls()
                .contains(&Call::DeleteObject(spec.state_key.clone()))
        );
        assert!(!cloud.store().unwrap().objects.contains_key(&spec.state_key));
        assert!(ctx.created.is_empty());
    }

    #[tokio::test]
    async fn test_existing_remote_state_is_not_overwritten() {
        let (cloud, spec, snapshot) = setup();
        let policy = RetryPolicy::default();
        let mut ctx = RunContext::new();
        let store = StoreId::new(&spec.name);

        let outcome = Migrator::new(&cloud, &policy)
            .migrate(&store, &spec, Some(&snapshot), true, &mut ctx)
            .await
            .unwrap();

        assert_eq!(outcome, MigrationOutcome::RemotePresent);
        assert!(cloud.calls().is_empty());
        assert!(!ctx.mutated);
    }

    #[tokio::test]
    async fn test_no_snapshot_is_skipped() {
        let (cloud, spec, _) = setup();
        let policy = RetryPolicy::default();
        let mut ctx = RunContext::new();
        let store = StoreId::new(&spec.name);

        let outcome = Migrator::new(&cloud, &policy)
            .migrate(&store, &spec, None, false, &mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::NoSnapshot);
        assert!(cloud.calls().is_empty());
    }
}
