//! Desired configuration of the remote state store

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Default object key the local snapshot is migrated to
pub const DEFAULT_STATE_KEY: &str = "bootstrap/terraform.tfstate";

/// Default audience for federated trust policies
pub const DEFAULT_TRUST_AUDIENCE: &str = "sts.amazonaws.com";

/// Desired configuration for the remote state store
///
/// Built once from static configuration and never modified after the
/// bootstrap run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Store (bucket) name
    pub name: String,
    /// Region the store lives in (e.g., "ap-northeast-1" or "aws.Region.ap_northeast_1")
    pub region: String,
    /// Object key of the migrated state snapshot
    #[serde(default = "default_state_key")]
    pub state_key: String,
    /// Whether object versioning must be enabled
    #[serde(default = "default_true")]
    pub versioning: bool,
    /// Server-side encryption requirement
    #[serde(default)]
    pub encryption: EncryptionSpec,
    /// Public access policy
    #[serde(default)]
    pub public_access: PublicAccessPolicy,
    /// Locking mechanism the dependent engine uses
    #[serde(default)]
    pub lock: LockSpec,
    /// Optional federated trust role created alongside the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_role: Option<TrustRoleSpec>,
}

fn default_state_key() -> String {
    DEFAULT_STATE_KEY.to_string()
}

fn default_true() -> bool {
    true
}

impl BackendSpec {
    /// Create a spec with secure defaults (versioning, AES256, deny-all public access)
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            state_key: default_state_key(),
            versioning: true,
            encryption: EncryptionSpec::default(),
            public_access: PublicAccessPolicy::DenyAll,
            lock: LockSpec::default(),
            trust_role: None,
        }
    }

    /// Region in AWS format (hyphens)
    pub fn normalized_region(&self) -> String {
        normalize_region(&self.region)
    }

    /// Object key used for the lock primitive
    pub fn lock_key(&self) -> String {
        self.lock
            .key
            .clone()
            .unwrap_or_else(|| format!("{}.tflock", self.state_key))
    }

    /// Check the configuration before any cloud call is made
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_store_name(&self.name)?;

        let region = self.normalized_region();
        if !is_region_shaped(&region) {
            return Err(ConfigError::invalid(
                "backend.region",
                format!(
                    "'{}' is not a region (expected e.g. ap-northeast-1 or aws.Region.ap_northeast_1)",
                    self.region
                ),
            ));
        }

        if self.state_key.trim().is_empty() || self.state_key.starts_with('/') {
            return Err(ConfigError::invalid(
                "backend.state_key",
                "must be a non-empty relative object key",
            ));
        }

        if self.lock_key() == self.state_key {
            return Err(ConfigError::invalid(
                "backend.lock.key",
                "lock key must differ from the state key",
            ));
        }

        if self.encryption.kms_key_id.is_some()
            && self.encryption.algorithm != EncryptionAlgorithm::AwsKms
        {
            return Err(ConfigError::invalid(
                "backend.encryption.kms_key_id",
                "only valid with algorithm = \"aws:kms\"",
            ));
        }

        if let Some(role) = &self.trust_role {
            role.validate()?;
        }

        Ok(())
    }
}

/// Server-side encryption requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub algorithm: EncryptionAlgorithm,
    /// KMS key id or ARN (aws:kms only; account default key when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
}

impl Default for EncryptionSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: EncryptionAlgorithm::Aes256,
            kms_key_id: None,
        }
    }
}

/// Server-side encryption algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    #[default]
    #[serde(rename = "AES256")]
    Aes256,
    #[serde(rename = "aws:kms")]
    AwsKms,
}

impl EncryptionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::Aes256 => "AES256",
            EncryptionAlgorithm::AwsKms => "aws:kms",
        }
    }
}

impl std::fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public access policy for the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublicAccessPolicy {
    /// Block public ACLs and policies entirely
    #[default]
    DenyAll,
    /// Leave public access settings untouched
    Unmanaged,
}

/// Lock primitive shared with the dependent engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSpec {
    #[serde(default)]
    pub mechanism: LockMechanism,
    /// Lock object key. Defaults to `<state_key>.tflock`, the object the
    /// engine's S3 backend locks with `use_lockfile`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockMechanism {
    /// A JSON lock object stored next to the state object
    #[default]
    LockObject,
}

/// Federated trust role created alongside the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRoleSpec {
    /// Role name
    pub name: String,
    /// ARN of the OIDC identity provider trusted by the role
    pub federated_provider_arn: String,
    /// Allowed `sub` claim patterns (e.g., "repo:org/infra:ref:refs/heads/main")
    pub subjects: Vec<String>,
    #[serde(default = "default_audience")]
    pub audience: String,
}

fn default_audience() -> String {
    DEFAULT_TRUST_AUDIENCE.to_string()
}

impl TrustRoleSpec {
    pub fn new(
        name: impl Into<String>,
        federated_provider_arn: impl Into<String>,
        subjects: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            federated_provider_arn: federated_provider_arn.into(),
            subjects,
            audience: default_audience(),
        }
    }

    /// Issuer host taken from the provider ARN
    /// (`arn:aws:iam::<acct>:oidc-provider/<host>` -> `<host>`)
    pub fn issuer(&self) -> &str {
        self.federated_provider_arn
            .split_once("oidc-provider/")
            .map(|(_, host)| host)
            .unwrap_or(&self.federated_provider_arn)
    }

    /// Assume-role policy allowing web identity federation for the subjects
    pub fn trust_policy(&self) -> serde_json::Value {
        let issuer = self.issuer();
        serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Federated": self.federated_provider_arn },
                "Action": "sts:AssumeRoleWithWebIdentity",
                "Condition": {
                    "StringEquals": { format!("{}:aud", issuer): self.audience },
                    "StringLike": { format!("{}:sub", issuer): self.subjects },
                },
            }],
        })
    }

    /// Inline policy granting read/write on the state store
    pub fn access_policy(&self, store: &str) -> serde_json::Value {
        serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [
                {
                    "Effect": "Allow",
                    "Action": ["s3:ListBucket", "s3:GetBucketVersioning"],
                    "Resource": format!("arn:aws:s3:::{}", store),
                },
                {
                    "Effect": "Allow",
                    "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
                    "Resource": format!("arn:aws:s3:::{}/*", store),
                },
            ],
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.len() > 64 {
            return Err(ConfigError::invalid(
                "backend.trust_role.name",
                "must be 1-64 characters",
            ));
        }
        if !self.federated_provider_arn.starts_with("arn:") {
            return Err(ConfigError::invalid(
                "backend.trust_role.federated_provider_arn",
                "must be an ARN",
            ));
        }
        if self.subjects.is_empty() || self.subjects.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "backend.trust_role.subjects",
                "at least one non-empty subject is required",
            ));
        }
        Ok(())
    }
}

/// Normalize region string to AWS format
/// e.g., "aws.Region.ap_northeast_1" -> "ap-northeast-1"
pub fn normalize_region(s: &str) -> String {
    let region_part = if s.contains('.') {
        s.split('.').next_back().unwrap_or(s)
    } else {
        s
    };
    region_part.replace('_', "-")
}

/// "xx-name-N" with at least one middle segment
fn is_region_shaped(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();
    if parts.len() < 3 {
        return false;
    }
    let (first, rest) = (parts[0], &parts[1..]);
    let Some((last, middle)) = rest.split_last() else {
        return false;
    };
    first.len() == 2
        && first.chars().all(|c| c.is_ascii_lowercase())
        && middle
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase()))
        && !last.is_empty()
        && last.chars().all(|c| c.is_ascii_digit())
}

/// Bucket naming rules
fn validate_store_name(name: &str) -> Result<(), ConfigError> {
    let field = "backend.name";
    if name.len() < 3 || name.len() > 63 {
        return Err(ConfigError::invalid(field, "must be 3-63 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(ConfigError::invalid(
            field,
            "only lowercase letters, digits, '-' and '.' are allowed",
        ));
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(ConfigError::invalid(
            field,
            "must start and end with a letter or digit",
        ));
    }
    if name.contains("..") {
        return Err(ConfigError::invalid(field, "must not contain '..'"));
    }
    if name.parse::<std::net::Ipv4Addr>().is_ok() {
        return Err(ConfigError::invalid(
            field,
            "must not be formatted as an IP address",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_spec_has_secure_defaults() {
        let spec = BackendSpec::new("state-store-1", "ap-northeast-1");
        assert!(spec.versioning);
        assert!(spec.encryption.enabled);
        assert_eq!(spec.encryption.algorithm, EncryptionAlgorithm::Aes256);
        assert_eq!(spec.public_access, PublicAccessPolicy::DenyAll);
        assert_eq!(spec.state_key, DEFAULT_STATE_KEY);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_lock_key_defaults_to_state_key_suffix() {
        let spec = BackendSpec::new("state-store-1", "us-east-1");
        assert_eq!(spec.lock_key(), "bootstrap/terraform.tfstate.tflock");

        let mut custom = spec.clone();
        custom.lock.key = Some("locks/main".to_string());
        assert_eq!(custom.lock_key(), "locks/main");
    }

    #[test]
    fn test_normalize_region() {
        assert_eq!(normalize_region("aws.Region.ap_northeast_1"), "ap-northeast-1");
        assert_eq!(normalize_region("ap_northeast_1"), "ap-northeast-1");
        assert_eq!(normalize_region("eu-west-1"), "eu-west-1");
    }

    #[test]
    fn test_region_shape() {
        assert!(is_region_shaped("us-east-1"));
        assert!(is_region_shaped("ap-southeast-3"));
        assert!(is_region_shaped("us-gov-west-1"));
        assert!(!is_region_shaped("useast1"));
        assert!(!is_region_shaped("us-east"));
        assert!(!is_region_shaped("USA-east-1"));
    }

    #[test]
    fn test_store_name_rules() {
        assert!(validate_store_name("aidoctors-tf-state").is_ok());
        assert!(validate_store_name("my.state.bucket").is_ok());
        assert!(validate_store_name("ab").is_err());
        assert!(validate_store_name("Upper-Case").is_err());
        assert!(validate_store_name("-leading").is_err());
        assert!(validate_store_name("trailing-").is_err());
        assert!(validate_store_name("double..dot").is_err());
        assert!(validate_store_name("192.168.1.10").is_err());
        assert!(validate_store_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_kms_key_requires_kms_algorithm() {
        let mut spec = BackendSpec::new("state-store-1", "us-east-1");
        spec.encryption.kms_key_id = Some("alias/state".to_string());
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("kms_key_id"));

        spec.encryption.algorithm = EncryptionAlgorithm::AwsKms;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_lock_key_must_differ_from_state_key() {
        let mut spec = BackendSpec::new("state-store-1", "us-east-1");
        spec.lock.key = Some(spec.state_key.clone());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_trust_role_validation() {
        let mut spec = BackendSpec::new("state-store-1", "us-east-1");
        spec.trust_role = Some(TrustRoleSpec {
            name: "ci-deployer".to_string(),
            federated_provider_arn:
                "arn:aws:iam::123456789012:oidc-provider/token.actions.githubusercontent.com"
                    .to_string(),
            subjects: vec![],
            audience: DEFAULT_TRUST_AUDIENCE.to_string(),
        });
        assert!(spec.validate().is_err());

        if let Some(role) = spec.trust_role.as_mut() {
            role.subjects.push("repo:org/infra:ref:refs/heads/main".to_string());
        }
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_encryption_algorithm_serde_names() {
        let json = serde_json::to_string(&EncryptionAlgorithm::AwsKms).unwrap();
        assert_eq!(json, "\"aws:kms\"");
        let parsed: EncryptionAlgorithm = serde_json::from_str("\"AES256\"").unwrap();
        assert_eq!(parsed, EncryptionAlgorithm::Aes256);
    }

    #[test]
    fn test_trust_policy_conditions() {
        let role = TrustRoleSpec::new(
            "ci-deployer",
            "arn:aws:iam::123456789012:oidc-provider/token.actions.githubusercontent.com",
            vec!["repo:acme/infra:*".to_string()],
        );
        assert_eq!(role.issuer(), "token.actions.githubusercontent.com");

        let policy = role.trust_policy();
        let statement = &policy["Statement"][0];
        assert_eq!(statement["Action"], "sts:AssumeRoleWithWebIdentity");
        assert_eq!(
            statement["Condition"]["StringEquals"]["token.actions.githubusercontent.com:aud"],
            "sts.amazonaws.com"
        );
        assert_eq!(
            statement["Condition"]["StringLike"]["token.actions.githubusercontent.com:sub"][0],
            "repo:acme/infra:*"
        );

        let access = role.access_policy("state-store-1");
        assert_eq!(
            access["Statement"][1]["Resource"],
            "arn:aws:s3:::state-store-1/*"
        );
    }
}
