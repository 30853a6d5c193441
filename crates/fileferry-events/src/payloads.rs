//! Event payload types carried on the bus.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// States of the transfer workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Checking the request shape.
    Validate,
    /// Obtaining an ephemeral credential.
    AcquireCredential,
    /// Reading source object metadata.
    FetchMetadata,
    /// Computing the transfer plan.
    SelectStrategy,
    /// Moving bytes.
    ExecuteTransfer,
    /// Feeding the outcome into the learning store.
    RecordOutcome,
    /// Revoking the credential.
    ReleaseCredential,
    /// Informing collaborators.
    Notify,
    /// Terminal success.
    Done,
    /// Error sink; cleanup follows.
    Failed,
}

impl WorkflowState {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::AcquireCredential => "acquire_credential",
            Self::FetchMetadata => "fetch_metadata",
            Self::SelectStrategy => "select_strategy",
            Self::ExecuteTransfer => "execute_transfer",
            Self::RecordOutcome => "record_outcome",
            Self::ReleaseCredential => "release_credential",
            Self::Notify => "notify",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Normal successor on the happy path; `None` for terminal states.
    #[must_use]
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Validate => Some(Self::AcquireCredential),
            Self::AcquireCredential => Some(Self::FetchMetadata),
            Self::FetchMetadata => Some(Self::SelectStrategy),
            Self::SelectStrategy => Some(Self::ExecuteTransfer),
            Self::ExecuteTransfer => Some(Self::RecordOutcome),
            Self::RecordOutcome => Some(Self::ReleaseCredential),
            Self::ReleaseCredential => Some(Self::Notify),
            Self::Notify => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// Whether the state ends a run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Typed lifecycle events.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A workflow run was accepted.
    RunStarted {
        /// Run identifier.
        run_id: Uuid,
        /// Requester identity.
        requester: String,
        /// Source object as `bucket/key`.
        source: String,
    },
    /// A run entered a workflow state.
    StateEntered {
        /// Run identifier.
        run_id: Uuid,
        /// State entered.
        state: WorkflowState,
    },
    /// An ephemeral session was issued for a run.
    SessionIssued {
        /// Run identifier.
        run_id: Uuid,
        /// Session token.
        token: Uuid,
        /// Hard expiry of the session.
        expires_at: DateTime<Utc>,
    },
    /// A run's session was revoked.
    SessionReleased {
        /// Run identifier.
        run_id: Uuid,
        /// Session token.
        token: Uuid,
    },
    /// A transfer plan was chosen.
    PlanSelected {
        /// Run identifier.
        run_id: Uuid,
        /// `single` or `chunked`.
        strategy: String,
        /// Chunk size for chunked plans.
        chunk_size_bytes: Option<u64>,
        /// Worker count.
        parallelism: usize,
        /// Whether chunks are compressed.
        compression: bool,
    },
    /// Bytes confirmed at the destination so far.
    TransferProgress {
        /// Run identifier.
        run_id: Uuid,
        /// Bytes written.
        bytes_completed: u64,
        /// Total bytes expected.
        bytes_total: u64,
    },
    /// A ticketing or notification call failed and was skipped.
    CollaboratorUnavailable {
        /// Run identifier.
        run_id: Uuid,
        /// Collaborator name.
        collaborator: String,
        /// Failure description.
        detail: String,
    },
    /// A run finished successfully.
    RunCompleted {
        /// Run identifier.
        run_id: Uuid,
        /// Bytes written.
        bytes_transferred: u64,
        /// Run duration in milliseconds.
        duration_ms: u64,
    },
    /// A run ended in the failed state.
    RunFailed {
        /// Run identifier.
        run_id: Uuid,
        /// Error kind label.
        kind: String,
        /// Failure description.
        detail: String,
    },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::StateEntered { .. } => "state_entered",
            Self::SessionIssued { .. } => "session_issued",
            Self::SessionReleased { .. } => "session_released",
            Self::PlanSelected { .. } => "plan_selected",
            Self::TransferProgress { .. } => "transfer_progress",
            Self::CollaboratorUnavailable { .. } => "collaborator_unavailable",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
        }
    }

    /// Run the event belongs to.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StateEntered { run_id, .. }
            | Self::SessionIssued { run_id, .. }
            | Self::SessionReleased { run_id, .. }
            | Self::PlanSelected { run_id, .. }
            | Self::TransferProgress { run_id, .. }
            | Self::CollaboratorUnavailable { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. } => *run_id,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}
