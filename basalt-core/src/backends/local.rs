//! Local directory backend
//!
//! Each store is a directory under a root. Store settings live in a
//! `.basalt-store.json` metadata file, objects live under `objects/`, and
//! trust roles are JSON files under `<root>/.roles/`. Useful for dry runs
//! and for exercising the bootstrapper without cloud credentials.
//!
//! A new store is assembled in a hidden staging directory and renamed into
//! place, so it never becomes visible without its metadata.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use crate::cloud::{CloudApi, CloudError, CloudResult, StoreId, StoreSetting, TrustRole};
use crate::lock::LockInfo;
use crate::snapshot::Checksum;
use crate::spec::{BackendSpec, EncryptionAlgorithm, TrustRoleSpec};
use crate::state::{BackendState, MANAGED_BY_TAG, MANAGED_BY_VALUE};

const METADATA_FILE: &str = ".basalt-store.json";
const OBJECTS_DIR: &str = "objects";
const ROLES_DIR: &str = ".roles";

/// Persisted settings of a local store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub versioning: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionAlgorithm>,
    #[serde(default)]
    pub public_access_blocked: bool,
}

impl StoreMetadata {
    fn managed() -> Self {
        let mut tags = HashMap::new();
        tags.insert(MANAGED_BY_TAG.to_string(), MANAGED_BY_VALUE.to_string());
        Self {
            tags,
            ..Self::default()
        }
    }

    fn is_managed(&self) -> bool {
        self.tags.get(MANAGED_BY_TAG).map(String::as_str) == Some(MANAGED_BY_VALUE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoleRecord {
    arn: String,
    /// Written by this backend; hand-made records lack it
    #[serde(default)]
    managed: bool,
    trust_policy: serde_json::Value,
    access_policy: serde_json::Value,
}

/// Directory-backed implementation of [`CloudApi`]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.store_dir(name).join(METADATA_FILE)
    }

    fn object_path(&self, name: &str, key: &str) -> CloudResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(CloudError::Provider(format!("Invalid object key: {}", key)));
        }
        Ok(self.store_dir(name).join(OBJECTS_DIR).join(relative))
    }

    fn role_path(&self, name: &str) -> PathBuf {
        self.root.join(ROLES_DIR).join(format!("{}.json", name))
    }

    fn read_metadata(&self, name: &str) -> CloudResult<Option<StoreMetadata>> {
        let path = self.metadata_path(name);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                CloudError::Provider(format!("Failed to parse {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.store_dir(name).is_dir() {
                    // A directory without metadata is a store someone else made
                    Ok(Some(StoreMetadata::default()))
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn write_metadata(&self, name: &str, metadata: &StoreMetadata) -> CloudResult<()> {
        write_json(&self.metadata_path(name), metadata)
    }

    /// No metadata and nothing inside but an empty `objects/`
    fn is_claimable(&self, name: &str) -> CloudResult<bool> {
        if self.metadata_path(name).exists() {
            return Ok(false);
        }
        let dir = self.store_dir(name);
        for entry in std::fs::read_dir(&dir).map_err(|e| io_error(&dir, e))? {
            let entry = entry.map_err(|e| io_error(&dir, e))?;
            let path = entry.path();
            if entry.file_name() != OBJECTS_DIR || !path.is_dir() || !is_empty_dir(&path)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Accept an existing store if it is ours, or mark it if it is empty
    fn claim_store(&self, name: &str) -> CloudResult<StoreId> {
        let metadata = self.read_metadata(name)?;
        if metadata.as_ref().is_some_and(StoreMetadata::is_managed) {
            return Ok(StoreId::new(name));
        }
        if metadata.is_some() && self.is_claimable(name)? {
            self.write_metadata(name, &StoreMetadata::managed())?;
            return Ok(StoreId::new(name));
        }
        Err(CloudError::Conflict(format!(
            "{} already exists",
            self.store_dir(name).display()
        )))
    }

    fn read_role(&self, name: &str) -> CloudResult<Option<RoleRecord>> {
        let path = self.role_path(name);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                CloudError::Provider(format!("Failed to parse {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn existing_metadata(&self, id: &StoreId) -> CloudResult<StoreMetadata> {
        self.read_metadata(id.as_str())?
            .ok_or_else(|| CloudError::NotFound(format!("store {}", id)))
    }

    fn read_lock(&self, path: &Path) -> CloudResult<Option<LockInfo>> {
        match std::fs::read(path) {
            Ok(bytes) => LockInfo::decode(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, e)),
        }
    }

    fn try_create_lock(&self, path: &Path, lock: &LockInfo) -> CloudResult<bool> {
        let content = lock.encode()?;
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                file.write_all(&content).map_err(|e| io_error(path, e))?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(io_error(path, e)),
        }
    }
}

fn io_error(path: &Path, e: std::io::Error) -> CloudError {
    match e.kind() {
        ErrorKind::NotFound => CloudError::NotFound(path.display().to_string()),
        ErrorKind::PermissionDenied => {
            CloudError::AccessDenied(format!("{}: {}", path.display(), e))
        }
        _ => CloudError::Provider(format!("{}: {}", path.display(), e)),
    }
}

fn is_empty_dir(path: &Path) -> CloudResult<bool> {
    let mut entries = std::fs::read_dir(path).map_err(|e| io_error(path, e))?;
    Ok(entries.next().is_none())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> CloudResult<()> {
    let content = serde_json::to_vec_pretty(value).map_err(|e| {
        CloudError::Provider(format!("Failed to serialize {}: {}", path.display(), e))
    })?;
    write_atomic(path, &content)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> CloudResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    std::fs::write(&tmp, bytes).map_err(|e| io_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

#[async_trait]
impl CloudApi for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn probe(&self, spec: &BackendSpec) -> CloudResult<BackendState> {
        if !self.root.is_dir() {
            return Err(CloudError::Connectivity(format!(
                "local root {} is not a directory",
                self.root.display()
            )));
        }

        let role = match &spec.trust_role {
            Some(role) => self.read_role(&role.name)?,
            None => None,
        };
        let trust_role_managed = role.as_ref().is_some_and(|r| r.managed);
        let trust_role_arn = role.map(|r| r.arn);

        let Some(metadata) = self.read_metadata(&spec.name)? else {
            return Ok(BackendState {
                trust_role_arn,
                trust_role_managed,
                ..BackendState::missing()
            });
        };

        let managed = metadata.is_managed();
        let claimable = !managed && self.is_claimable(&spec.name)?;
        let state_object_present = self.object_path(&spec.name, &spec.state_key)?.is_file();

        Ok(BackendState {
            exists: true,
            managed,
            claimable,
            versioning_enabled: metadata.versioning,
            encryption_enabled: metadata.encryption.is_some(),
            encryption_algorithm: metadata.encryption,
            public_access_blocked: metadata.public_access_blocked,
            lock_capable: true,
            state_object_present,
            trust_role_arn,
            trust_role_managed,
        })
    }

    async fn create_store(&self, spec: &BackendSpec) -> CloudResult<StoreId> {
        let dir = self.store_dir(&spec.name);
        if dir.is_dir() {
            return self.claim_store(&spec.name);
        }

        let staging = self
            .root
            .join(format!(".{}.tmp-{}", spec.name, uuid::Uuid::new_v4()));
        let staged = std::fs::create_dir_all(staging.join(OBJECTS_DIR))
            .map_err(|e| io_error(&staging, e))
            .and_then(|()| write_json(&staging.join(METADATA_FILE), &StoreMetadata::managed()));
        if let Err(e) = staged {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        match std::fs::rename(&staging, &dir) {
            Ok(()) => Ok(StoreId::new(&spec.name)),
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging);
                if dir.is_dir() {
                    // Lost a race with another creator
                    self.claim_store(&spec.name)
                } else {
                    Err(io_error(&dir, e))
                }
            }
        }
    }

    async fn configure_store(&self, id: &StoreId, setting: &StoreSetting) -> CloudResult<()> {
        let mut metadata = self.existing_metadata(id)?;
        match setting {
            StoreSetting::Versioning => metadata.versioning = true,
            StoreSetting::Encryption { algorithm, .. } => metadata.encryption = Some(*algorithm),
            StoreSetting::PublicAccessBlock => metadata.public_access_blocked = true,
        }
        self.write_metadata(id.as_str(), &metadata)
    }

    async fn write_object(&self, id: &StoreId, key: &str, bytes: &[u8]) -> CloudResult<Checksum> {
        self.existing_metadata(id)?;
        let path = self.object_path(id.as_str(), key)?;
        write_atomic(&path, bytes)?;
        let stored = std::fs::read(&path).map_err(|e| io_error(&path, e))?;
        Ok(Checksum::of(&stored))
    }

    async fn read_object(&self, id: &StoreId, key: &str) -> CloudResult<Vec<u8>> {
        let path = self.object_path(id.as_str(), key)?;
        std::fs::read(&path).map_err(|e| io_error(&path, e))
    }

    async fn delete_object(&self, id: &StoreId, key: &str) -> CloudResult<()> {
        let path = self.object_path(id.as_str(), key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn acquire_lock(
        &self,
        id: &StoreId,
        lock_key: &str,
        operation: &str,
    ) -> CloudResult<LockInfo> {
        self.existing_metadata(id)?;
        let path = self.object_path(id.as_str(), lock_key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let lock = LockInfo::new(operation);
        if self.try_create_lock(&path, &lock)? {
            return Ok(lock);
        }

        match self.read_lock(&path)? {
            Some(existing) if !existing.is_expired() => Err(existing.held_error()),
            _ => {
                // Expired or vanished between the two calls
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(io_error(&path, e)),
                }
                if self.try_create_lock(&path, &lock)? {
                    Ok(lock)
                } else {
                    Err(CloudError::Conflict(format!(
                        "lock {} was taken concurrently",
                        lock_key
                    )))
                }
            }
        }
    }

    async fn release_lock(
        &self,
        id: &StoreId,
        lock_key: &str,
        lock: &LockInfo,
    ) -> CloudResult<()> {
        let path = self.object_path(id.as_str(), lock_key)?;
        let existing = self
            .read_lock(&path)?
            .ok_or_else(|| CloudError::LockNotFound(lock.id.clone()))?;

        if existing.id != lock.id {
            return Err(CloudError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }

        std::fs::remove_file(&path).map_err(|e| io_error(&path, e))
    }

    async fn force_unlock(&self, id: &StoreId, lock_key: &str, lock_id: &str) -> CloudResult<()> {
        let path = self.object_path(id.as_str(), lock_key)?;
        let existing = self
            .read_lock(&path)?
            .ok_or_else(|| CloudError::LockNotFound(lock_id.to_string()))?;

        if existing.id != lock_id {
            return Err(CloudError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }

        std::fs::remove_file(&path).map_err(|e| io_error(&path, e))
    }

    async fn ensure_trust_role(
        &self,
        id: &StoreId,
        role: &TrustRoleSpec,
    ) -> CloudResult<TrustRole> {
        let existing = self.read_role(&role.name)?;
        if existing.as_ref().is_some_and(|r| !r.managed) {
            return Err(CloudError::Conflict(format!(
                "role {} exists without the {} marker",
                role.name, MANAGED_BY_TAG
            )));
        }

        let record = RoleRecord {
            arn: format!("local:role/{}", role.name),
            managed: true,
            trust_policy: role.trust_policy(),
            access_policy: role.access_policy(id.as_str()),
        };
        write_json(&self.role_path(&role.name), &record)?;
        Ok(TrustRole {
            arn: record.arn,
            created: existing.is_none(),
        })
    }
}
