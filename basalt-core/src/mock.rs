//! Recording in-memory cloud used by unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cloud::{CloudApi, CloudError, CloudResult, StoreId, StoreSetting, TrustRole};
use crate::lock::LockInfo;
use crate::snapshot::Checksum;
use crate::spec::{BackendSpec, EncryptionAlgorithm, TrustRoleSpec};
use crate::state::BackendState;

/// A call made against the mock, in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Probe,
    CreateStore,
    Configure(StoreSetting),
    WriteObject(String),
    ReadObject(String),
    DeleteObject(String),
    AcquireLock,
    ReleaseLock,
    ForceUnlock,
    EnsureTrustRole,
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Call::Probe | Call::ReadObject(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockStore {
    pub managed: bool,
    pub versioning: bool,
    pub encryption: Option<EncryptionAlgorithm>,
    pub public_access_blocked: bool,
    pub objects: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    store: Option<MockStore>,
    role_arn: Option<String>,
    role_managed: bool,
    calls: Vec<Call>,
    failures: HashMap<&'static str, VecDeque<CloudError>>,
    corrupt_writes: bool,
}

#[derive(Default)]
pub struct MockCloud {
    inner: Mutex<Inner>,
}

impl MockCloud {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A mock whose store already fully matches `spec`
    pub fn with_compliant_store(spec: &BackendSpec) -> Self {
        let mock = Self::empty();
        mock.set_store(MockStore {
            managed: true,
            versioning: spec.versioning,
            encryption: spec
                .encryption
                .enabled
                .then_some(spec.encryption.algorithm),
            public_access_blocked: true,
            objects: HashMap::new(),
        });
        mock
    }

    pub fn set_store(&self, store: MockStore) {
        self.inner.lock().unwrap().store = Some(store);
    }

    /// Pretend a role named `name` already exists
    pub fn set_role(&self, name: &str, managed: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.role_arn = Some(role_arn(name));
        inner.role_managed = managed;
    }

    pub fn store(&self) -> Option<MockStore> {
        self.inner.lock().unwrap().store.clone()
    }

    /// Make the next call to `operation` fail with `error`
    pub fn fail_next(&self, operation: &'static str, error: CloudError) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Report a wrong checksum for every write
    pub fn corrupt_writes(&self) {
        self.inner.lock().unwrap().corrupt_writes = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    fn record(&self, call: Call, operation: &'static str) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
        match inner.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn with_store<T>(
        &self,
        id: &StoreId,
        f: impl FnOnce(&mut MockStore) -> CloudResult<T>,
    ) -> CloudResult<T> {
        let mut inner = self.inner.lock().unwrap();
        match inner.store.as_mut() {
            Some(store) => f(store),
            None => Err(CloudError::NotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl CloudApi for MockCloud {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn probe(&self, spec: &BackendSpec) -> CloudResult<BackendState> {
        self.record(Call::Probe, "probe")?;
        let inner = self.inner.lock().unwrap();
        let trust_role_arn = spec.trust_role.as_ref().and(inner.role_arn.clone());
        let trust_role_managed = trust_role_arn.is_some() && inner.role_managed;
        Ok(match &inner.store {
            None => BackendState {
                trust_role_arn,
                trust_role_managed,
                ..BackendState::missing()
            },
            Some(store) => BackendState {
                exists: true,
                managed: store.managed,
                claimable: !store.managed && store.objects.is_empty(),
                versioning_enabled: store.versioning,
                encryption_enabled: store.encryption.is_some(),
                encryption_algorithm: store.encryption,
                public_access_blocked: store.public_access_blocked,
                lock_capable: true,
                state_object_present: store.objects.contains_key(&spec.state_key),
                trust_role_arn,
                trust_role_managed,
            },
        })
    }

    async fn create_store(&self, spec: &BackendSpec) -> CloudResult<StoreId> {
        self.record(Call::CreateStore, "create_store")?;
        let mut inner = self.inner.lock().unwrap();
        match inner.store.as_mut() {
            None => {
                inner.store = Some(MockStore {
                    managed: true,
                    ..MockStore::default()
                });
            }
            Some(store) if store.managed => {}
            Some(store) if store.objects.is_empty() => store.managed = true,
            Some(_) => return Err(CloudError::Conflict(format!("{} is in use", spec.name))),
        }
        Ok(StoreId::new(&spec.name))
    }

    async fn configure_store(&self, id: &StoreId, setting: &StoreSetting) -> CloudResult<()> {
        self.record(Call::Configure(setting.clone()), "configure_store")?;
        self.with_store(id, |store| {
            match setting {
                StoreSetting::Versioning => store.versioning = true,
                StoreSetting::Encryption { algorithm, .. } => store.encryption = Some(*algorithm),
                StoreSetting::PublicAccessBlock => store.public_access_blocked = true,
            }
            Ok(())
        })
    }

    async fn write_object(&self, id: &StoreId, key: &str, bytes: &[u8]) -> CloudResult<Checksum> {
        self.record(Call::WriteObject(key.to_string()), "write_object")?;
        let corrupt = self.inner.lock().unwrap().corrupt_writes;
        self.with_store(id, |store| {
            let stored = if corrupt {
                let mut b = bytes.to_vec();
                b.push(b'!');
                b
            } else {
                bytes.to_vec()
            };
            let checksum = Checksum::of(&stored);
            store.objects.insert(key.to_string(), stored);
            Ok(checksum)
        })
    }

    async fn read_object(&self, id: &StoreId, key: &str) -> CloudResult<Vec<u8>> {
        self.record(Call::ReadObject(key.to_string()), "read_object")?;
        self.with_store(id, |store| {
            store
                .objects
                .get(key)
                .cloned()
                .ok_or_else(|| CloudError::NotFound(key.to_string()))
        })
    }

    async fn delete_object(&self, id: &StoreId, key: &str) -> CloudResult<()> {
        self.record(Call::DeleteObject(key.to_string()), "delete_object")?;
        self.with_store(id, |store| {
            store.objects.remove(key);
            Ok(())
        })
    }

    async fn acquire_lock(
        &self,
        id: &StoreId,
        lock_key: &str,
        operation: &str,
    ) -> CloudResult<LockInfo> {
        self.record(Call::AcquireLock, "acquire_lock")?;
        self.with_store(id, |store| {
            if let Some(bytes) = store.objects.get(lock_key) {
                let existing = LockInfo::decode(bytes)?;
                if !existing.is_expired() {
                    return Err(existing.held_error());
                }
            }
            let lock = LockInfo::new(operation);
            store.objects.insert(lock_key.to_string(), lock.encode()?);
            Ok(lock)
        })
    }

    async fn release_lock(
        &self,
        id: &StoreId,
        lock_key: &str,
        lock: &LockInfo,
    ) -> CloudResult<()> {
        self.record(Call::ReleaseLock, "release_lock")?;
        self.with_store(id, |store| match store.objects.get(lock_key) {
            None => Err(CloudError::LockNotFound(lock.id.clone())),
            Some(bytes) => {
                let existing = LockInfo::decode(bytes)?;
                if existing.id != lock.id {
                    return Err(CloudError::LockMismatch {
                        expected: lock.id.clone(),
                        actual: existing.id,
                    });
                }
                store.objects.remove(lock_key);
                Ok(())
            }
        })
    }

    async fn force_unlock(&self, id: &StoreId, lock_key: &str, lock_id: &str) -> CloudResult<()> {
        self.record(Call::ForceUnlock, "force_unlock")?;
        self.with_store(id, |store| {
            if store.objects.remove(lock_key).is_none() {
                return Err(CloudError::LockNotFound(lock_id.to_string()));
            }
            Ok(())
        })
    }

    async fn ensure_trust_role(
        &self,
        _id: &StoreId,
        role: &TrustRoleSpec,
    ) -> CloudResult<TrustRole> {
        self.record(Call::EnsureTrustRole, "ensure_trust_role")?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(arn) = inner.role_arn.clone() {
            if !inner.role_managed {
                return Err(CloudError::Conflict(format!("role {} is not managed", role.name)));
            }
            return Ok(TrustRole {
                arn,
                created: false,
            });
        }
        let arn = role_arn(&role.name);
        inner.role_arn = Some(arn.clone());
        inner.role_managed = true;
        Ok(TrustRole { arn, created: true })
    }
}

fn role_arn(name: &str) -> String {
    format!("arn:aws:iam::123456789012:role/{}", name)
}
