//! Capability traits implemented by storage backends and collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CollaboratorResult, IoResult, StoreResult};
use crate::model::{
    AccessMaterial, DestinationDescriptor, Priority, Protocol, RunRecord, SourceLocator,
    SourceMetadata, TransferOutcome,
};
use crate::payload::ChunkPayload;

/// Read access to object storage.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Fetch size, content type and integrity tag for an object.
    async fn head(
        &self,
        locator: &SourceLocator,
        material: &AccessMaterial,
    ) -> IoResult<SourceMetadata>;

    /// Read `length` bytes starting at `offset`.
    async fn read_range(
        &self,
        locator: &SourceLocator,
        material: &AccessMaterial,
        offset: u64,
        length: u64,
    ) -> IoResult<Vec<u8>>;
}

/// Opens destination connections.
#[async_trait]
pub trait DestinationConnector: Send + Sync {
    /// Connect to the destination described by `descriptor`.
    async fn connect(
        &self,
        descriptor: &DestinationDescriptor,
        protocol: Protocol,
    ) -> IoResult<Arc<dyn DestinationConnection>>;
}

/// An open destination bound to one target path.
#[async_trait]
pub trait DestinationConnection: Send + Sync {
    /// Write a payload at `offset` of the target file, decoding as needed.
    async fn write_at(&self, offset: u64, payload: ChunkPayload) -> IoResult<()>;

    /// Flush the target and report what landed.
    async fn finalize(&self) -> IoResult<DestinationReceipt>;
}

/// What a destination reports after finalising a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationReceipt {
    /// Length of the assembled target.
    pub bytes_written: u64,
    /// Lowercase hex SHA-256 of the target, when the destination can compute it.
    pub digest: Option<String>,
}

/// Answers whether the credential window backing a transfer is still open.
#[async_trait]
pub trait SessionProbe: Send + Sync {
    /// `true` while the session may still be used.
    async fn is_valid(&self) -> bool;
}

/// Wall-clock source; injectable so expiry can be tested deterministically.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Status reported when updating a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Work has started.
    InProgress,
    /// Transfer completed.
    Resolved,
    /// Transfer failed.
    Failed,
}

impl TicketStatus {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        }
    }
}

/// External ticketing system.
#[async_trait]
pub trait TicketingSystem: Send + Sync {
    /// Open a ticket and return its identifier.
    async fn open(&self, summary: &str, detail: &str, priority: Priority)
    -> CollaboratorResult<String>;

    /// Update an existing ticket.
    async fn update(
        &self,
        ticket_id: &str,
        status: TicketStatus,
        detail: &str,
    ) -> CollaboratorResult<()>;
}

/// Terminal event delivered to notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    /// Transfer completed.
    TransferSucceeded,
    /// Transfer failed.
    TransferFailed,
}

impl NotificationEvent {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransferSucceeded => "transfer_succeeded",
            Self::TransferFailed => "transfer_failed",
        }
    }
}

/// External notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a terminal event to `recipient`.
    async fn notify(
        &self,
        recipient: &str,
        event: NotificationEvent,
        payload: &TransferOutcome,
    ) -> CollaboratorResult<()>;
}

/// Per-run ledger backing status and history queries.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Record a newly started run.
    async fn record_started(&self, record: &RunRecord) -> StoreResult<()>;

    /// Record the terminal outcome of a run.
    async fn record_finished(
        &self,
        run_id: Uuid,
        outcome: &TransferOutcome,
        finished_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Current record for a run.
    async fn status(&self, run_id: Uuid) -> StoreResult<Option<RunRecord>>;

    /// Most recent runs for a requester, newest first.
    async fn history(&self, requester: &str, limit: usize) -> StoreResult<Vec<RunRecord>>;
}
