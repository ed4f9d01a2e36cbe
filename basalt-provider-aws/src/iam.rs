//! IAM side of the provider: the federated trust role

use aws_sdk_iam::Client;
use aws_sdk_iam::types::Tag;
use log::{debug, info};

use basalt_core::spec::TrustRoleSpec;
use basalt_core::state::{MANAGED_BY_TAG, MANAGED_BY_VALUE};
use basalt_core::{CloudError, CloudResult, TrustRole};

use crate::error::{build_error, classify, is_code};

/// Name of the inline policy granting access to the state store
pub const ACCESS_POLICY_NAME: &str = "basalt-state-access";

/// A role found by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundRole {
    pub arn: String,
    /// Carries the managed-by tag
    pub managed: bool,
}

pub struct TrustRoles {
    client: Client,
}

impl TrustRoles {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The role named `name`, if it exists
    pub async fn find(&self, name: &str) -> CloudResult<Option<FoundRole>> {
        match self.client.get_role().role_name(name).send().await {
            Ok(output) => Ok(output.role().map(|r| FoundRole {
                arn: r.arn().to_string(),
                managed: has_marker(r.tags()),
            })),
            Err(err) if is_code(&err, "NoSuchEntity") => Ok(None),
            Err(err) => Err(classify("GetRole", &err)),
        }
    }

    /// Create the role, or refresh the policies of one we created earlier
    ///
    /// A role of the same name without the managed-by tag is never modified.
    pub async fn ensure(&self, store: &str, role: &TrustRoleSpec) -> CloudResult<TrustRole> {
        let ensured = match self.find(&role.name).await? {
            Some(found) if found.managed => {
                info!("trust role {} already exists", role.name);
                self.client
                    .update_assume_role_policy()
                    .role_name(&role.name)
                    .policy_document(role.trust_policy().to_string())
                    .send()
                    .await
                    .map_err(|e| classify("UpdateAssumeRolePolicy", &e))?;
                TrustRole {
                    arn: found.arn,
                    created: false,
                }
            }
            Some(_) => return Err(unmanaged(&role.name)),
            None => self.create(role).await?,
        };

        let policy = role.access_policy(store).to_string();
        self.client
            .put_role_policy()
            .role_name(&role.name)
            .policy_name(ACCESS_POLICY_NAME)
            .policy_document(policy)
            .send()
            .await
            .map_err(|e| classify("PutRolePolicy", &e))?;

        Ok(ensured)
    }

    async fn create(&self, role: &TrustRoleSpec) -> CloudResult<TrustRole> {
        let tag = Tag::builder()
            .key(MANAGED_BY_TAG)
            .value(MANAGED_BY_VALUE)
            .build()
            .map_err(|e| build_error("role tag", e))?;

        let result = self
            .client
            .create_role()
            .role_name(&role.name)
            .assume_role_policy_document(role.trust_policy().to_string())
            .description("Assumed by CI to access the remote state store")
            .tags(tag)
            .send()
            .await;

        match result {
            Ok(output) => output
                .role()
                .map(|r| TrustRole {
                    arn: r.arn().to_string(),
                    created: true,
                })
                .ok_or_else(|| CloudError::Provider("CreateRole returned no role".to_string())),
            Err(err) if is_code(&err, "EntityAlreadyExists") => {
                debug!("trust role {} appeared concurrently", role.name);
                match self.find(&role.name).await? {
                    Some(found) if found.managed => Ok(TrustRole {
                        arn: found.arn,
                        created: false,
                    }),
                    Some(_) => Err(unmanaged(&role.name)),
                    None => Err(CloudError::Conflict(format!(
                        "role {} exists but cannot be read",
                        role.name
                    ))),
                }
            }
            Err(err) => Err(classify("CreateRole", &err)),
        }
    }
}

fn unmanaged(name: &str) -> CloudError {
    CloudError::Conflict(format!(
        "role {} exists without the {} tag",
        name, MANAGED_BY_TAG
    ))
}

fn has_marker(tags: &[Tag]) -> bool {
    tags.iter()
        .any(|t| t.key() == MANAGED_BY_TAG && t.value() == MANAGED_BY_VALUE)
}
