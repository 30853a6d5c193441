//! Error types for credential operations.

use fileferry_core::{ErrorKind, StoreError};
use thiserror::Error;
use uuid::Uuid;

/// Primary error type for the credential broker.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The requester is not authorised for the requested scope.
    #[error("requester not authorized for scope")]
    AuthRejected {
        /// Requester identity.
        requester: String,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// The approval reference is malformed.
    #[error("approval reference rejected")]
    ApprovalInvalid {
        /// Offending reference.
        approval_ref: String,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// The approval reference already backs a live session.
    #[error("approval reference already in use")]
    ApprovalInUse {
        /// Offending reference.
        approval_ref: String,
        /// Token of the live session holding it.
        holder: Uuid,
    },
    /// No session exists for the token.
    #[error("session not found")]
    UnknownSession {
        /// Token looked up.
        token: Uuid,
    },
    /// The session exists but is expired or revoked.
    #[error("session no longer valid")]
    SessionInvalid {
        /// Token looked up.
        token: Uuid,
    },
    /// The session store failed.
    #[error("session store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
}

impl CredentialError {
    /// User-visible classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthRejected { .. }
            | Self::ApprovalInvalid { .. }
            | Self::ApprovalInUse { .. } => ErrorKind::Authorization,
            Self::UnknownSession { .. } | Self::SessionInvalid { .. } => ErrorKind::SessionExpired,
            Self::Store { .. } => ErrorKind::TransientIo,
        }
    }

    /// Human-readable detail including context fields.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::AuthRejected { requester, reason } => format!("{self}: {requester} ({reason})"),
            Self::ApprovalInvalid {
                approval_ref,
                reason,
            } => format!("{self}: {approval_ref} ({reason})"),
            Self::ApprovalInUse {
                approval_ref,
                holder,
            } => format!("{self}: {approval_ref} held by session {holder}"),
            Self::UnknownSession { token } | Self::SessionInvalid { token } => {
                format!("{self}: {token}")
            }
            Self::Store { operation, source } => format!("{self} during {operation}: {source}"),
        }
    }

    pub(crate) const fn store(operation: &'static str, source: StoreError) -> Self {
        Self::Store { operation, source }
    }
}

/// Convenience alias for credential results.
pub type CredentialResult<T> = Result<T, CredentialError>;
