//! S3 side of the provider: the bucket, its settings, objects and lock object

use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, BucketVersioningStatus, ChecksumAlgorithm,
    CreateBucketConfiguration, PublicAccessBlockConfiguration, ServerSideEncryption,
    ServerSideEncryptionByDefault, ServerSideEncryptionConfiguration, ServerSideEncryptionRule,
    Tag, Tagging, VersioningConfiguration,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, info, warn};
use std::time::Duration;

use basalt_core::state::{MANAGED_BY_TAG, MANAGED_BY_VALUE};
use basalt_core::{CloudError, CloudResult, Checksum, LockInfo, StoreId, StoreSetting};
use basalt_core::spec::EncryptionAlgorithm;

use crate::error::{build_error, classify, is_code};

/// Attempts at placing the managed-by tag before giving up
const TAG_ATTEMPTS: u32 = 3;

/// Settings read back from an existing bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketSettings {
    pub managed: bool,
    /// No tags and no objects
    pub claimable: bool,
    pub versioning: bool,
    pub encryption: Option<Option<EncryptionAlgorithm>>,
    pub public_access_blocked: bool,
}

/// S3 operations on the state bucket
pub struct StateBucket {
    client: Client,
    region: String,
}

impl StateBucket {
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    /// `Ok(false)` only on a definite 404
    pub async fn exists(&self, bucket: &str) -> CloudResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => match classify("HeadBucket", &err) {
                CloudError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    pub async fn settings(&self, bucket: &str) -> CloudResult<BucketSettings> {
        let tags = self.tags(bucket).await?;
        let managed = has_marker(&tags);
        let claimable = !managed && tags.is_empty() && self.is_empty(bucket).await?;
        Ok(BucketSettings {
            managed,
            claimable,
            versioning: self.versioning_enabled(bucket).await?,
            encryption: self.encryption(bucket).await?,
            public_access_blocked: self.public_access_blocked(bucket).await?,
        })
    }

    async fn tags(&self, bucket: &str) -> CloudResult<Vec<Tag>> {
        match self.client.get_bucket_tagging().bucket(bucket).send().await {
            Ok(output) => Ok(output.tag_set().to_vec()),
            Err(err) if is_code(&err, "NoSuchTagSet") => Ok(Vec::new()),
            Err(err) => Err(classify("GetBucketTagging", &err)),
        }
    }

    async fn is_empty(&self, bucket: &str) -> CloudResult<bool> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| classify("ListObjectsV2", &e))?;
        Ok(output.contents().is_empty())
    }

    async fn versioning_enabled(&self, bucket: &str) -> CloudResult<bool> {
        let output = self
            .client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| classify("GetBucketVersioning", &e))?;
        Ok(output.status() == Some(&BucketVersioningStatus::Enabled))
    }

    /// `None` when unencrypted, `Some(None)` for an algorithm we do not model
    async fn encryption(&self, bucket: &str) -> CloudResult<Option<Option<EncryptionAlgorithm>>> {
        match self.client.get_bucket_encryption().bucket(bucket).send().await {
            Ok(output) => {
                let algorithm = output
                    .server_side_encryption_configuration()
                    .and_then(|c| c.rules().first())
                    .and_then(|r| r.apply_server_side_encryption_by_default())
                    .map(|d| d.sse_algorithm().clone());
                Ok(algorithm.map(|a| match a {
                    ServerSideEncryption::Aes256 => Some(EncryptionAlgorithm::Aes256),
                    ServerSideEncryption::AwsKms | ServerSideEncryption::AwsKmsDsse => {
                        Some(EncryptionAlgorithm::AwsKms)
                    }
                    _ => None,
                }))
            }
            Err(err) if is_code(&err, "ServerSideEncryptionConfigurationNotFoundError") => {
                Ok(None)
            }
            Err(err) => Err(classify("GetBucketEncryption", &err)),
        }
    }

    async fn public_access_blocked(&self, bucket: &str) -> CloudResult<bool> {
        match self
            .client
            .get_public_access_block()
            .bucket(bucket)
            .send()
            .await
        {
            Ok(output) => Ok(output.public_access_block_configuration().is_some_and(|c| {
                c.block_public_acls() == Some(true)
                    && c.block_public_policy() == Some(true)
                    && c.ignore_public_acls() == Some(true)
                    && c.restrict_public_buckets() == Some(true)
            })),
            Err(err) if is_code(&err, "NoSuchPublicAccessBlockConfiguration") => Ok(false),
            Err(err) => Err(classify("GetPublicAccessBlock", &err)),
        }
    }

    pub async fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => match classify("HeadObject", &err) {
                CloudError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    /// Create the bucket and mark it as ours
    ///
    /// A bucket we already own is accepted if it carries the marker, or is
    /// claimed if it has no tags and no objects (a creation that stopped
    /// before tagging). Anything else is a conflict.
    pub async fn create(&self, bucket: &str) -> CloudResult<StoreId> {
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            let config = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build();
            request = request.create_bucket_configuration(config);
        }

        match request.send().await {
            Ok(_) => debug!("created bucket {} in {}", bucket, self.region),
            Err(err) if is_code(&err, "BucketAlreadyOwnedByYou") => {
                debug!("bucket {} is already ours; checking its marker", bucket)
            }
            Err(err) => return Err(classify("CreateBucket", &err)),
        }

        self.claim(bucket).await?;
        Ok(StoreId::new(bucket))
    }

    async fn claim(&self, bucket: &str) -> CloudResult<()> {
        let tags = self.tags(bucket).await?;
        if has_marker(&tags) {
            return Ok(());
        }
        if !tags.is_empty() || !self.is_empty(bucket).await? {
            return Err(CloudError::Conflict(format!(
                "bucket {} exists without the {} tag and is in use",
                bucket, MANAGED_BY_TAG
            )));
        }
        info!("marking bucket {} as managed", bucket);
        self.mark(bucket).await
    }

    /// Put the managed-by tag, retrying transient failures
    async fn mark(&self, bucket: &str) -> CloudResult<()> {
        let tag = Tag::builder()
            .key(MANAGED_BY_TAG)
            .value(MANAGED_BY_VALUE)
            .build()
            .map_err(|e| build_error("tag", e))?;
        let tagging = Tagging::builder()
            .tag_set(tag)
            .build()
            .map_err(|e| build_error("tagging", e))?;

        let mut attempt = 1;
        loop {
            let result = self
                .client
                .put_bucket_tagging()
                .bucket(bucket)
                .tagging(tagging.clone())
                .send()
                .await;
            let error = match result {
                Ok(_) => return Ok(()),
                Err(err) => classify("PutBucketTagging", &err),
            };
            if !error.is_transient() || attempt >= TAG_ATTEMPTS {
                return Err(error);
            }
            warn!("tagging {} failed (attempt {}): {}", bucket, attempt, error);
            tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
            attempt += 1;
        }
    }

    pub async fn configure(&self, bucket: &str, setting: &StoreSetting) -> CloudResult<()> {
        match setting {
            StoreSetting::Versioning => {
                let config = VersioningConfiguration::builder()
                    .status(BucketVersioningStatus::Enabled)
                    .build();
                self.client
                    .put_bucket_versioning()
                    .bucket(bucket)
                    .versioning_configuration(config)
                    .send()
                    .await
                    .map_err(|e| classify("PutBucketVersioning", &e))?;
            }
            StoreSetting::Encryption {
                algorithm,
                kms_key_id,
            } => {
                let sse = match algorithm {
                    EncryptionAlgorithm::Aes256 => ServerSideEncryption::Aes256,
                    EncryptionAlgorithm::AwsKms => ServerSideEncryption::AwsKms,
                };
                let by_default = ServerSideEncryptionByDefault::builder()
                    .sse_algorithm(sse)
                    .set_kms_master_key_id(kms_key_id.clone())
                    .build()
                    .map_err(|e| build_error("encryption default", e))?;
                let rule = ServerSideEncryptionRule::builder()
                    .apply_server_side_encryption_by_default(by_default)
                    .bucket_key_enabled(*algorithm == EncryptionAlgorithm::AwsKms)
                    .build();
                let config = ServerSideEncryptionConfiguration::builder()
                    .rules(rule)
                    .build()
                    .map_err(|e| build_error("encryption configuration", e))?;
                self.client
                    .put_bucket_encryption()
                    .bucket(bucket)
                    .server_side_encryption_configuration(config)
                    .send()
                    .await
                    .map_err(|e| classify("PutBucketEncryption", &e))?;
            }
            StoreSetting::PublicAccessBlock => {
                let config = PublicAccessBlockConfiguration::builder()
                    .block_public_acls(true)
                    .block_public_policy(true)
                    .ignore_public_acls(true)
                    .restrict_public_buckets(true)
                    .build();
                self.client
                    .put_public_access_block()
                    .bucket(bucket)
                    .public_access_block_configuration(config)
                    .send()
                    .await
                    .map_err(|e| classify("PutPublicAccessBlock", &e))?;
            }
        }
        Ok(())
    }

    /// Upload `bytes`, returning the SHA-256 S3 computed on its side
    pub async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> CloudResult<Checksum> {
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .send()
            .await
            .map_err(|e| classify("PutObject", &e))?;

        match output.checksum_sha256().and_then(decode_checksum) {
            Some(checksum) => Ok(checksum),
            None => {
                // Some S3-compatible endpoints omit it; the read-back still verifies
                debug!("no checksum returned for {}/{}", bucket, key);
                Ok(Checksum::of(bytes))
            }
        }
    }

    pub async fn get(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("GetObject", &e))?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| CloudError::Connectivity(format!("GetObject body: {}", e)))?;
        Ok(body.into_bytes().to_vec())
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> CloudResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("DeleteObject", &e))?;
        Ok(())
    }

    /// Read the lock object, if any
    async fn read_lock(&self, bucket: &str, lock_key: &str) -> CloudResult<Option<LockInfo>> {
        match self.get(bucket, lock_key).await {
            Ok(bytes) => LockInfo::decode(&bytes).map(Some),
            Err(CloudError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create the lock object only if it does not exist yet
    async fn put_lock_if_absent(
        &self,
        bucket: &str,
        lock_key: &str,
        lock: &LockInfo,
    ) -> CloudResult<bool> {
        let body = lock.encode()?;
        let result = self
            .client
            .put_object()
            .bucket(bucket)
            .key(lock_key)
            .if_none_match("*")
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => match classify("PutObject", &err) {
                CloudError::Conflict(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    pub async fn acquire_lock(
        &self,
        bucket: &str,
        lock_key: &str,
        operation: &str,
    ) -> CloudResult<LockInfo> {
        let lock = LockInfo::new(operation);
        if self.put_lock_if_absent(bucket, lock_key, &lock).await? {
            return Ok(lock);
        }

        match self.read_lock(bucket, lock_key).await? {
            Some(existing) if !existing.is_expired() => Err(existing.held_error()),
            _ => {
                // Expired lock - delete it and try once more
                self.delete(bucket, lock_key).await?;
                if self.put_lock_if_absent(bucket, lock_key, &lock).await? {
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

    /// Delete the lock object after checking it holds `lock_id`
    pub async fn unlock(&self, bucket: &str, lock_key: &str, lock_id: &str) -> CloudResult<()> {
        match self.read_lock(bucket, lock_key).await? {
            Some(existing) if existing.id != lock_id => Err(CloudError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            }),
            Some(_) => self.delete(bucket, lock_key).await,
            None => Err(CloudError::LockNotFound(lock_id.to_string())),
        }
    }
}

/// Decode the base64 `x-amz-checksum-sha256` value
fn decode_checksum(value: &str) -> Option<Checksum> {
    let digest = STANDARD.decode(value).ok()?;
    Checksum::from_digest(&digest)
}

fn has_marker(tags: &[Tag]) -> bool {
    tags.iter()
        .any(|t| t.key() == MANAGED_BY_TAG && t.value() == MANAGED_BY_VALUE)
}
