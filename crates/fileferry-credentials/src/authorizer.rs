//! Authorisation of read grants and minting of temporary access material.

use async_trait::async_trait;
use fileferry_config::GrantRule;
use fileferry_core::AccessMaterial;
use uuid::Uuid;

use crate::error::{CredentialError, CredentialResult};
use crate::session::SessionScope;

const ANY_REQUESTER: &str = "*";
const ACCESS_KEY_PREFIX: &str = "ASIA";

/// Decides whether a requester may read a scope and mints material when it may.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Authorise `requester` for `scope`, returning fresh access material.
    async fn authorize(
        &self,
        requester: &str,
        scope: &SessionScope,
    ) -> CredentialResult<AccessMaterial>;
}

/// Authoriser backed by a static list of grants.
#[derive(Debug, Clone)]
pub struct AllowlistAuthorizer {
    grants: Vec<GrantRule>,
    region: String,
}

impl AllowlistAuthorizer {
    /// Authoriser over `grants`, stamping `region` on issued material.
    #[must_use]
    pub fn new(grants: Vec<GrantRule>, region: impl Into<String>) -> Self {
        Self {
            grants,
            region: region.into(),
        }
    }

    fn permits(&self, requester: &str, scope: &SessionScope) -> bool {
        self.grants.iter().any(|grant| {
            (grant.requester == ANY_REQUESTER || grant.requester == requester)
                && grant.bucket == scope.bucket
                && scope.key.starts_with(&grant.prefix)
        })
    }

    fn mint(&self) -> AccessMaterial {
        let key_id = Uuid::new_v4().simple().to_string().to_uppercase();
        AccessMaterial {
            access_key_id: format!("{ACCESS_KEY_PREFIX}{}", &key_id[..16]),
            secret_access_key: Uuid::new_v4().simple().to_string(),
            session_token: format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
            region: self.region.clone(),
        }
    }
}

#[async_trait]
impl Authorizer for AllowlistAuthorizer {
    async fn authorize(
        &self,
        requester: &str,
        scope: &SessionScope,
    ) -> CredentialResult<AccessMaterial> {
        if requester.trim().is_empty() {
            return Err(CredentialError::AuthRejected {
                requester: requester.to_string(),
                reason: "empty_requester",
            });
        }
        if !self.permits(requester, scope) {
            return Err(CredentialError::AuthRejected {
                requester: requester.to_string(),
                reason: "no_matching_grant",
            });
        }
        Ok(self.mint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(bucket: &str, key: &str) -> SessionScope {
        SessionScope {
            run_id: Uuid::new_v4(),
            approval_ref: "REQ1".into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    fn authorizer() -> AllowlistAuthorizer {
        AllowlistAuthorizer::new(
            vec![
                GrantRule {
                    requester: "alice".into(),
                    bucket: "finance".into(),
                    prefix: "reports/".into(),
                },
                GrantRule {
                    requester: "*".into(),
                    bucket: "public".into(),
                    prefix: String::new(),
                },
            ],
            "eu-west-1",
        )
    }

    #[tokio::test]
    async fn matching_grant_mints_regional_material() -> anyhow::Result<()> {
        let material = authorizer()
            .authorize("alice", &scope("finance", "reports/q1.csv"))
            .await?;
        assert!(material.access_key_id.starts_with("ASIA"));
        assert_eq!(material.region, "eu-west-1");
        Ok(())
    }

    #[tokio::test]
    async fn wildcard_grant_covers_any_requester() -> anyhow::Result<()> {
        authorizer()
            .authorize("bob", &scope("public", "anything.bin"))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn prefix_and_requester_must_match() {
        let authorizer = authorizer();
        let outside_prefix = authorizer
            .authorize("alice", &scope("finance", "payroll/q1.csv"))
            .await;
        assert!(matches!(
            outside_prefix,
            Err(CredentialError::AuthRejected {
                reason: "no_matching_grant",
                ..
            })
        ));
        let other_requester = authorizer
            .authorize("mallory", &scope("finance", "reports/q1.csv"))
            .await;
        assert!(other_requester.is_err());
    }

    #[tokio::test]
    async fn blank_requester_is_rejected() {
        let result = authorizer().authorize(" ", &scope("public", "x")).await;
        assert!(matches!(
            result,
            Err(CredentialError::AuthRejected {
                reason: "empty_requester",
                ..
            })
        ));
    }
}
