//! Error taxonomy shared across the transfer engine.
//!
//! # Design
//! - `ErrorKind` is the user-visible classification carried in run outcomes.
//! - Error messages stay constant; context travels in structured fields.
//! - Capability traits report `IoError`; only its `Transient` flavour is retried.

use std::error::Error;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::chunk::ChunkStatus;

/// Classification surfaced to callers when a run fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request input.
    Validation,
    /// The requester is not allowed the requested access.
    Authorization,
    /// The credential window closed before the run finished.
    SessionExpired,
    /// The source object does not exist.
    SourceNotFound,
    /// A transient I/O failure outlived its retry budget outside the executor.
    TransientIo,
    /// At least one chunk exceeded its attempt ceiling.
    ChunkExhausted,
    /// A single-stream transfer or permanent I/O failure ended the transfer.
    TransferFailed,
    /// Destination length or digest disagreed with the source.
    IntegrityMismatch,
    /// An external collaborator could not be reached.
    CollaboratorUnavailable,
}

impl ErrorKind {
    /// Stable label used in logs, metrics and persisted records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::SessionExpired => "session_expired",
            Self::SourceNotFound => "source_not_found",
            Self::TransientIo => "transient_io",
            Self::ChunkExhausted => "chunk_exhausted",
            Self::TransferFailed => "transfer_failed",
            Self::IntegrityMismatch => "integrity_mismatch",
            Self::CollaboratorUnavailable => "collaborator_unavailable",
        }
    }

    /// Parse a persisted label back into a kind.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        let kind = match label {
            "validation" => Self::Validation,
            "authorization" => Self::Authorization,
            "session_expired" => Self::SessionExpired,
            "source_not_found" => Self::SourceNotFound,
            "transient_io" => Self::TransientIo,
            "chunk_exhausted" => Self::ChunkExhausted,
            "transfer_failed" => Self::TransferFailed,
            "integrity_mismatch" => Self::IntegrityMismatch,
            "collaborator_unavailable" => Self::CollaboratorUnavailable,
            _ => return None,
        };
        Some(kind)
    }

    /// What the caller should do about a failure of this kind.
    #[must_use]
    pub const fn remediation(self) -> Remediation {
        match self {
            Self::Validation | Self::Authorization | Self::SourceNotFound => {
                Remediation::FixRequest
            }
            Self::SessionExpired => Remediation::ReacquireCredential,
            Self::TransientIo
            | Self::ChunkExhausted
            | Self::TransferFailed
            | Self::IntegrityMismatch
            | Self::CollaboratorUnavailable => Remediation::RetryLater,
        }
    }
}

/// Coarse guidance attached to user-visible failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    /// The request itself must change before resubmitting.
    FixRequest,
    /// Resubmitting unchanged may succeed later.
    RetryLater,
    /// Resubmit through the approval path to obtain a new credential window.
    ReacquireCredential,
}

impl Remediation {
    /// Stable label for the remediation class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FixRequest => "fix_request",
            Self::RetryLater => "retry_later",
            Self::ReacquireCredential => "reacquire_credential",
        }
    }
}

/// Failure reported by object-storage and destination capabilities.
#[derive(Debug, Error)]
pub enum IoError {
    /// Failure expected to clear on retry (network blip, throttling).
    #[error("transient io failure")]
    Transient {
        /// Operation identifier.
        operation: &'static str,
        /// Backend-supplied description.
        detail: String,
    },
    /// Requested object or path does not exist.
    #[error("object not found")]
    NotFound {
        /// Operation identifier.
        operation: &'static str,
        /// Backend-supplied description.
        detail: String,
    },
    /// Failure that will not clear on retry.
    #[error("permanent io failure")]
    Permanent {
        /// Operation identifier.
        operation: &'static str,
        /// Backend-supplied description.
        detail: String,
    },
}

impl IoError {
    /// Build a transient failure.
    pub fn transient(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Transient {
            operation,
            detail: detail.into(),
        }
    }

    /// Build a not-found failure.
    pub fn not_found(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::NotFound {
            operation,
            detail: detail.into(),
        }
    }

    /// Build a permanent failure.
    pub fn permanent(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Permanent {
            operation,
            detail: detail.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Operation that produced the failure.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Transient { operation, .. }
            | Self::NotFound { operation, .. }
            | Self::Permanent { operation, .. } => operation,
        }
    }

    /// Backend-supplied description.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Transient { detail, .. }
            | Self::NotFound { detail, .. }
            | Self::Permanent { detail, .. } => detail,
        }
    }

    /// One-line description combining message, operation and detail.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{self} during {}: {}", self.operation(), self.detail())
    }
}

/// Result alias for capability calls.
pub type IoResult<T> = Result<T, IoError>;

/// A chunk task was asked to move backwards or skip a state.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid chunk state transition")]
pub struct ChunkTransitionError {
    /// Byte offset of the chunk.
    pub offset: u64,
    /// State the chunk was in.
    pub from: ChunkStatus,
    /// State that was requested.
    pub to: ChunkStatus,
}

/// Terminal failure of a single `execute` call.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The owning session became invalid mid-transfer.
    #[error("session expired during transfer")]
    SessionExpired {
        /// Bytes confirmed written before the abort.
        bytes_completed: u64,
    },
    /// One or more chunks used up every attempt.
    #[error("chunk retry ceiling exceeded")]
    ChunkExhausted {
        /// Offsets of the chunks that failed, ascending.
        failed_offsets: Vec<u64>,
        /// Attempt ceiling that applied.
        attempts: u32,
        /// Last error observed for the first failed chunk.
        last_error: String,
    },
    /// Single-stream exhaustion or a non-retryable I/O failure.
    #[error("transfer failed")]
    TransferFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Offsets affected by the failure.
        failed_offsets: Vec<u64>,
        /// Underlying capability failure.
        #[source]
        source: IoError,
    },
    /// Length or digest verification failed after all bytes were written.
    #[error("integrity mismatch after transfer")]
    IntegrityMismatch {
        /// Which property disagreed (`length` or `digest`).
        field: &'static str,
        /// Value derived from the source.
        expected: String,
        /// Value observed at the destination.
        actual: String,
    },
    /// The plan's fields contradict each other.
    #[error("transfer plan is inconsistent")]
    InvalidPlan {
        /// What is wrong with the plan.
        reason: &'static str,
    },
    /// Internal chunk bookkeeping was violated.
    #[error("chunk state transition rejected")]
    ChunkState {
        /// Rejected transition.
        #[source]
        source: ChunkTransitionError,
    },
}

impl TransferError {
    /// User-visible classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionExpired { .. } => ErrorKind::SessionExpired,
            Self::ChunkExhausted { .. } => ErrorKind::ChunkExhausted,
            Self::TransferFailed { .. } | Self::InvalidPlan { .. } | Self::ChunkState { .. } => {
                ErrorKind::TransferFailed
            }
            Self::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
        }
    }

    /// Offsets implicated in the failure, empty when not chunk specific.
    #[must_use]
    pub fn failed_offsets(&self) -> &[u64] {
        match self {
            Self::ChunkExhausted { failed_offsets, .. }
            | Self::TransferFailed { failed_offsets, .. } => failed_offsets,
            Self::SessionExpired { .. }
            | Self::IntegrityMismatch { .. }
            | Self::InvalidPlan { .. }
            | Self::ChunkState { .. } => &[],
        }
    }

    /// Human-readable detail for outcomes and notifications.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::SessionExpired { bytes_completed } => {
                format!("{self} after {bytes_completed} bytes")
            }
            Self::ChunkExhausted {
                failed_offsets,
                attempts,
                last_error,
            } => format!(
                "{self}: {} chunk(s) failed after {attempts} attempts \
                 at offsets {failed_offsets:?}: {last_error}",
                failed_offsets.len()
            ),
            Self::TransferFailed { source, .. } => format!("{self}: {}", source.describe()),
            Self::IntegrityMismatch {
                field,
                expected,
                actual,
            } => format!("{self}: {field} expected {expected}, found {actual}"),
            Self::InvalidPlan { reason } => format!("{self}: {reason}"),
            Self::ChunkState { source } => format!(
                "{self}: chunk at {} cannot move from {} to {}",
                source.offset,
                source.from.as_str(),
                source.to.as_str()
            ),
        }
    }
}

impl From<ChunkTransitionError> for TransferError {
    fn from(source: ChunkTransitionError) -> Self {
        Self::ChunkState { source }
    }
}

/// Failure raised by persistent stores (sessions, outcomes, run ledger).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store rejected or failed the operation.
    #[error("store operation failed")]
    Backend {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A persisted record could not be decoded.
    #[error("stored record malformed")]
    Malformed {
        /// Operation identifier.
        operation: &'static str,
        /// Field that failed to decode.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
}

impl StoreError {
    /// Wrap a backend error with an operation label.
    pub fn backend(
        operation: &'static str,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure talking to ticketing or notification systems.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The collaborator did not accept the call.
    #[error("collaborator unavailable")]
    Unavailable {
        /// Collaborator identifier (`ticketing`, `notifier`).
        collaborator: &'static str,
        /// Description of the failure.
        detail: String,
    },
}

/// Result alias for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_labels() {
        let kinds = [
            ErrorKind::Validation,
            ErrorKind::Authorization,
            ErrorKind::SessionExpired,
            ErrorKind::SourceNotFound,
            ErrorKind::TransientIo,
            ErrorKind::ChunkExhausted,
            ErrorKind::TransferFailed,
            ErrorKind::IntegrityMismatch,
            ErrorKind::CollaboratorUnavailable,
        ];
        for kind in kinds {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("bogus"), None);
    }

    #[test]
    fn remediation_separates_user_and_transient_failures() {
        assert_eq!(
            ErrorKind::Validation.remediation(),
            Remediation::FixRequest
        );
        assert_eq!(
            ErrorKind::Authorization.remediation(),
            Remediation::FixRequest
        );
        assert_eq!(
            ErrorKind::ChunkExhausted.remediation(),
            Remediation::RetryLater
        );
        assert_eq!(
            ErrorKind::SessionExpired.remediation(),
            Remediation::ReacquireCredential
        );
    }

    #[test]
    fn chunk_exhausted_reports_offsets() {
        let err = TransferError::ChunkExhausted {
            failed_offsets: vec![10, 30],
            attempts: 3,
            last_error: "timeout".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ChunkExhausted);
        assert_eq!(err.failed_offsets(), &[10, 30]);
        assert!(err.detail().contains("[10, 30]"));
    }

    #[test]
    fn transfer_failed_carries_io_context() {
        let err = TransferError::TransferFailed {
            operation: "stream",
            failed_offsets: vec![0],
            source: IoError::transient("write_at", "connection reset"),
        };
        assert_eq!(err.kind(), ErrorKind::TransferFailed);
        assert!(err.detail().contains("connection reset"));
        assert!(err.source().is_some());
    }
}
