//! Basalt AWS Provider
//!
//! `CloudApi` on S3 (store, objects, lock object) and IAM (trust role).

mod error;
pub mod iam;
pub mod s3;

use async_trait::async_trait;
use aws_config::Region;
use aws_config::retry::RetryConfig;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sdk_iam::Client as IamClient;
use aws_sdk_s3::Client as S3Client;
use log::debug;

use basalt_core::spec::{TrustRoleSpec, normalize_region};
use basalt_core::{
    BackendSpec, BackendState, Checksum, CloudApi, CloudError, CloudResult, LockInfo, StoreId,
    StoreSetting, TrustRole,
};

use crate::iam::TrustRoles;
use crate::s3::StateBucket;

/// How to reach AWS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsSettings {
    pub region: String,
    /// Named profile from the shared config files
    pub profile: Option<String>,
    /// Custom endpoint (e.g., LocalStack); switches S3 to path-style addressing
    pub endpoint_url: Option<String>,
}

impl AwsSettings {
    pub fn new(region: &str) -> Self {
        Self {
            region: normalize_region(region),
            ..Self::default()
        }
    }
}

/// AWS Provider
pub struct AwsProvider {
    bucket: StateBucket,
    roles: TrustRoles,
    credentials: Option<SharedCredentialsProvider>,
}

impl AwsProvider {
    /// Create a new AWS Provider
    ///
    /// SDK-level retries are disabled; the bootstrapper's retry policy owns
    /// retrying so attempts are bounded once.
    pub async fn new(settings: &AwsSettings) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .retry_config(RetryConfig::disabled());
        if let Some(profile) = &settings.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(settings.endpoint_url.is_some())
            .build();

        Self {
            bucket: StateBucket::new(S3Client::from_conf(s3_config), settings.region.clone()),
            roles: TrustRoles::new(IamClient::new(&config)),
            credentials: config.credentials_provider(),
        }
    }

    /// Resolve credentials before the first request so a missing profile
    /// is never mistaken for a missing bucket
    async fn check_credentials(&self) -> CloudResult<()> {
        let Some(provider) = &self.credentials else {
            return Err(CloudError::Credentials(
                "no AWS credentials provider is configured".to_string(),
            ));
        };
        provider
            .provide_credentials()
            .await
            .map(|_| ())
            .map_err(|e| CloudError::Credentials(format!("Failed to load AWS credentials: {}", e)))
    }
}

#[async_trait]
impl CloudApi for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn probe(&self, spec: &BackendSpec) -> CloudResult<BackendState> {
        self.check_credentials().await?;

        let role = match &spec.trust_role {
            Some(role) => self.roles.find(&role.name).await?,
            None => None,
        };
        let trust_role_managed = role.as_ref().is_some_and(|r| r.managed);
        let trust_role_arn = role.map(|r| r.arn);

        if !self.bucket.exists(&spec.name).await? {
            debug!("bucket {} does not exist", spec.name);
            return Ok(BackendState {
                trust_role_arn,
                trust_role_managed,
                ..BackendState::missing()
            });
        }

        let settings = self.bucket.settings(&spec.name).await?;
        let state_object_present = self
            .bucket
            .object_exists(&spec.name, &spec.state_key)
            .await?;

        Ok(BackendState {
            exists: true,
            managed: settings.managed,
            claimable: settings.claimable,
            versioning_enabled: settings.versioning,
            encryption_enabled: settings.encryption.is_some(),
            encryption_algorithm: settings.encryption.flatten(),
            public_access_blocked: settings.public_access_blocked,
            // S3 conditional writes back the lock object
            lock_capable: true,
            state_object_present,
            trust_role_arn,
            trust_role_managed,
        })
    }

    async fn create_store(&self, spec: &BackendSpec) -> CloudResult<StoreId> {
        self.bucket.create(&spec.name).await
    }

    async fn configure_store(&self, id: &StoreId, setting: &StoreSetting) -> CloudResult<()> {
        self.bucket.configure(id.as_str(), setting).await
    }

    async fn write_object(&self, id: &StoreId, key: &str, bytes: &[u8]) -> CloudResult<Checksum> {
        self.bucket.put(id.as_str(), key, bytes).await
    }

    async fn read_object(&self, id: &StoreId, key: &str) -> CloudResult<Vec<u8>> {
        self.bucket.get(id.as_str(), key).await
    }

    async fn delete_object(&self, id: &StoreId, key: &str) -> CloudResult<()> {
        self.bucket.delete(id.as_str(), key).await
    }

    async fn acquire_lock(
        &self,
        id: &StoreId,
        lock_key: &str,
        operation: &str,
    ) -> CloudResult<LockInfo> {
        self.bucket
            .acquire_lock(id.as_str(), lock_key, operation)
            .await
    }

    async fn release_lock(
        &self,
        id: &StoreId,
        lock_key: &str,
        lock: &LockInfo,
    ) -> CloudResult<()> {
        self.bucket.unlock(id.as_str(), lock_key, &lock.id).await
    }

    async fn force_unlock(&self, id: &StoreId, lock_key: &str, lock_id: &str) -> CloudResult<()> {
        self.bucket.unlock(id.as_str(), lock_key, lock_id).await
    }

    async fn ensure_trust_role(
        &self,
        id: &StoreId,
        role: &TrustRoleSpec,
    ) -> CloudResult<TrustRole> {
        self.roles.ensure(id.as_str(), role).await
    }
}
