//! Credential broker: issues, validates and revokes ephemeral sessions.

use std::sync::Arc;

use async_trait::async_trait;
use fileferry_core::{AccessMaterial, Clock, SessionProbe};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::authorizer::Authorizer;
use crate::error::{CredentialError, CredentialResult};
use crate::session::{Session, SessionInfo, SessionScope};
use crate::store::{InsertOutcome, SessionStore};

/// Issues and tracks ten-second read sessions.
pub struct CredentialBroker {
    store: Arc<dyn SessionStore>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
    approval_prefixes: Vec<String>,
}

impl std::fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("approval_prefixes", &self.approval_prefixes)
            .finish_non_exhaustive()
    }
}

impl CredentialBroker {
    /// Broker over the given store, authoriser and clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        authorizer: Arc<dyn Authorizer>,
        clock: Arc<dyn Clock>,
        approval_prefixes: Vec<String>,
    ) -> Self {
        Self {
            store,
            authorizer,
            clock,
            approval_prefixes,
        }
    }

    /// Issue a session for `requester` over `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::ApprovalInvalid`] for a malformed approval
    /// reference, [`CredentialError::AuthRejected`] when the requester has no
    /// matching grant, [`CredentialError::ApprovalInUse`] when the reference
    /// already backs a live session, and [`CredentialError::Store`] when the
    /// session store fails.
    pub async fn issue(&self, requester: &str, scope: &SessionScope) -> CredentialResult<Session> {
        self.check_approval(&scope.approval_ref)?;
        let material = self.authorizer.authorize(requester, scope).await?;
        let now = self.clock.now();
        let session = Session::new(requester, scope.clone(), material, now);
        match self
            .store
            .insert(&session, now)
            .await
            .map_err(|source| CredentialError::store("session.insert", source))?
        {
            InsertOutcome::Inserted => {
                info!(
                    token = %session.token,
                    run_id = %scope.run_id,
                    requester,
                    bucket = %scope.bucket,
                    key = %scope.key,
                    expires_at = %session.expires_at,
                    "session issued"
                );
                Ok(session)
            }
            InsertOutcome::ApprovalInUse { holder } => Err(CredentialError::ApprovalInUse {
                approval_ref: scope.approval_ref.clone(),
                holder,
            }),
        }
    }

    /// Whether `token` names an unrevoked session inside its window.
    ///
    /// Store failures read as invalid.
    pub async fn is_valid(&self, token: Uuid) -> bool {
        match self.store.get(token).await {
            Ok(Some(session)) => session.is_valid_at(self.clock.now()),
            Ok(None) => false,
            Err(err) => {
                warn!(%token, error = %err, "session lookup failed; treating as invalid");
                false
            }
        }
    }

    /// Revoke `token`. Unknown or already-revoked tokens are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Store`] when the session store fails.
    pub async fn revoke(&self, token: Uuid) -> CredentialResult<()> {
        let changed = self
            .store
            .revoke(token)
            .await
            .map_err(|source| CredentialError::store("session.revoke", source))?;
        if changed {
            info!(%token, "session revoked");
        } else {
            debug!(%token, "revoke ignored for unknown or revoked session");
        }
        Ok(())
    }

    /// Reporting view of a session.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::UnknownSession`] when no record exists and
    /// [`CredentialError::Store`] when the store fails.
    pub async fn session_info(&self, token: Uuid) -> CredentialResult<SessionInfo> {
        let session = self.load(token).await?;
        Ok(session.info_at(self.clock.now()))
    }

    /// Access material for a session that is still valid.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::UnknownSession`] when no record exists,
    /// [`CredentialError::SessionInvalid`] once expired or revoked, and
    /// [`CredentialError::Store`] when the store fails.
    pub async fn material(&self, token: Uuid) -> CredentialResult<AccessMaterial> {
        let session = self.load(token).await?;
        if !session.is_valid_at(self.clock.now()) {
            return Err(CredentialError::SessionInvalid { token });
        }
        session
            .material
            .ok_or(CredentialError::SessionInvalid { token })
    }

    /// Delete session records past expiry.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Store`] when the store fails.
    pub async fn purge_expired(&self) -> CredentialResult<u64> {
        let removed = self
            .store
            .purge_expired(self.clock.now())
            .await
            .map_err(|source| CredentialError::store("session.purge", source))?;
        if removed > 0 {
            debug!(removed, "purged expired sessions");
        }
        Ok(removed)
    }

    /// Probe answering validity of `token` for the transfer executor.
    #[must_use]
    pub fn guard(self: &Arc<Self>, token: Uuid) -> SessionGuard {
        SessionGuard {
            broker: Arc::clone(self),
            token,
        }
    }

    async fn load(&self, token: Uuid) -> CredentialResult<Session> {
        self.store
            .get(token)
            .await
            .map_err(|source| CredentialError::store("session.get", source))?
            .ok_or(CredentialError::UnknownSession { token })
    }

    fn check_approval(&self, approval_ref: &str) -> CredentialResult<()> {
        let reference = approval_ref.trim();
        let Some(rest) = self
            .approval_prefixes
            .iter()
            .find_map(|prefix| reference.strip_prefix(prefix.as_str()))
        else {
            return Err(CredentialError::ApprovalInvalid {
                approval_ref: approval_ref.to_string(),
                reason: "unknown_prefix",
            });
        };
        let number = rest.trim_start_matches(['-', '_']);
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CredentialError::ApprovalInvalid {
                approval_ref: approval_ref.to_string(),
                reason: "missing_identifier",
            });
        }
        Ok(())
    }
}

/// Validity probe bound to one session token.
#[derive(Debug, Clone)]
pub struct SessionGuard {
    broker: Arc<CredentialBroker>,
    token: Uuid,
}

impl SessionGuard {
    /// Token being probed.
    #[must_use]
    pub const fn token(&self) -> Uuid {
        self.token
    }
}

#[async_trait]
impl SessionProbe for SessionGuard {
    async fn is_valid(&self) -> bool {
        self.broker.is_valid(self.token).await
    }
}
