//! Bootstrap configuration file
//!
//! ```toml
//! [backend]
//! name = "state-store-1"
//! region = "ap-northeast-1"
//!
//! [snapshot]
//! path = "terraform.tfstate"
//!
//! [provider]
//! kind = "aws"
//! profile = "infra-admin"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{MAX_BACKOFF, MAX_MULTIPLIER, RetryPolicy};
use crate::spec::BackendSpec;

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "basalt.toml";

/// Default audit log path
pub const DEFAULT_AUDIT_LOG: &str = "basalt-audit.log";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Full contents of `basalt.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub backend: BackendSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

impl BootstrapConfig {
    /// Config with defaults for everything but the backend
    pub fn new(backend: BackendSpec) -> Self {
        Self {
            backend,
            snapshot: None,
            retry: RetryConfig::default(),
            provider: ProviderConfig::default(),
            audit: AuditConfig::default(),
        }
    }

    /// Load a config file without validating it, so callers can layer
    /// overrides on top first
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.validate()?;
        self.retry.validate()?;
        if self.provider.kind == ProviderKind::Local && self.provider.local_root.is_none() {
            return Err(ConfigError::invalid(
                "provider.local_root",
                "required when provider.kind = \"local\"",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Local state file to migrate into the store
    pub path: PathBuf,
}

/// Retry and timeout settings for cloud calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite()
            || !(1.0..=MAX_MULTIPLIER).contains(&self.backoff_multiplier)
        {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                format!("must be a number between 1.0 and {}", MAX_MULTIPLIER),
            ));
        }
        if u128::from(self.initial_backoff_ms) > MAX_BACKOFF.as_millis() {
            return Err(ConfigError::invalid(
                "retry.initial_backoff_ms",
                format!("must be at most {}", MAX_BACKOFF.as_millis()),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "retry.call_timeout_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.backoff_multiplier,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Aws,
    Local,
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aws" => Ok(ProviderKind::Aws),
            "local" => Ok(ProviderKind::Local),
            other => Err(ConfigError::invalid(
                "provider.kind",
                format!("unsupported provider '{}' (expected aws or local)", other),
            )),
        }
    }
}

/// Which cloud to talk to and with which credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Named credentials profile (aws)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Custom API endpoint, e.g. an S3-compatible server (aws)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    /// Root directory holding stores (local)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from(DEFAULT_AUDIT_LOG)
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{EncryptionAlgorithm, PublicAccessPolicy};
    use tempfile::tempdir;

    fn parse(content: &str) -> Result<BootstrapConfig, ConfigError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, content).unwrap();
        let config = BootstrapConfig::read(&path)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = parse(
            r#"
            [backend]
            name = "state-store-1"
            region = "ap-northeast-1"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.name, "state-store-1");
        assert!(config.backend.versioning);
        assert_eq!(config.backend.public_access, PublicAccessPolicy::DenyAll);
        assert!(config.snapshot.is_none());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.provider.kind, ProviderKind::Aws);
        assert_eq!(config.audit.path, PathBuf::from(DEFAULT_AUDIT_LOG));
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"
            [backend]
            name = "aidoctors-tf-state"
            region = "aws.Region.us_east_1"
            state_key = "global/terraform.tfstate"
            versioning = true
            public_access = "deny-all"

            [backend.encryption]
            algorithm = "aws:kms"
            kms_key_id = "alias/terraform-state"

            [backend.lock]
            mechanism = "lock-object"
            key = "global/terraform.lock"

            [backend.trust_role]
            name = "github-actions-terraform"
            federated_provider_arn = "arn:aws:iam::123456789012:oidc-provider/token.actions.githubusercontent.com"
            subjects = ["repo:org/infra:ref:refs/heads/main"]

            [snapshot]
            path = "bootstrap/terraform.tfstate"

            [retry]
            max_attempts = 5
            initial_backoff_ms = 250

            [provider]
            kind = "aws"
            profile = "bootstrap"

            [audit]
            path = "logs/audit.jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.normalized_region(), "us-east-1");
        assert_eq!(
            config.backend.encryption.algorithm,
            EncryptionAlgorithm::AwsKms
        );
        assert_eq!(config.backend.lock_key(), "global/terraform.lock");
        let role = config.backend.trust_role.as_ref().unwrap();
        assert_eq!(role.audience, "sts.amazonaws.com");
        assert_eq!(
            config.snapshot.unwrap().path,
            PathBuf::from("bootstrap/terraform.tfstate")
        );

        let policy = config.retry.policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(250));
        assert_eq!(policy.call_timeout, Duration::from_secs(30));
        assert_eq!(config.provider.profile.as_deref(), Some("bootstrap"));
    }

    #[test]
    fn test_missing_name_is_parse_error() {
        let result = parse(
            r#"
            [backend]
            region = "us-east-1"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_local_provider_requires_root() {
        let result = parse(
            r#"
            [backend]
            name = "state-store-1"
            region = "us-east-1"

            [provider]
            kind = "local"
            "#,
        );
        match result {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "provider.local_root"),
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = parse(
            r#"
            [backend]
            name = "state-store-1"
            region = "us-east-1"

            [retry]
            max_attempts = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_unbounded_backoff_multiplier_rejected() {
        for multiplier in ["nan", "inf", "1e20", "0.5"] {
            let result = parse(&format!(
                "[backend]\nname = \"state-store-1\"\nregion = \"us-east-1\"\n\n[retry]\nbackoff_multiplier = {}\n",
                multiplier
            ));
            match result {
                Err(ConfigError::Invalid { field, .. }) => {
                    assert_eq!(field, "retry.backoff_multiplier")
                }
                other => panic!("Expected Invalid error for {}, got {:?}", multiplier, other),
            }
        }
    }

    #[test]
    fn test_read_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("basalt.toml");
        std::fs::write(&path, "[backend]\nname = 1\n").unwrap();

        match BootstrapConfig::read(&path) {
            Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("Expected Parse error, got {:?}", other),
        }

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            BootstrapConfig::read(&missing),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!("local".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert!("gcs".parse::<ProviderKind>().is_err());
    }
}
