#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Engine-agnostic transfer model and capability interfaces.
//!
//! Everything the orchestrator, executor, broker and learning store exchange
//! lives here, together with the traits that stand in for object storage,
//! FTP/SFTP destinations and the external collaborators.

pub mod error;
pub mod model;
pub mod payload;
pub mod service;

pub use error::{
    ChunkTransitionError, CollaboratorError, CollaboratorResult, ErrorKind, IoError, IoResult,
    Remediation, StoreError, StoreResult, TransferError,
};
pub use model::chunk::{ChunkStatus, ChunkTask};
pub use model::{
    AccessMaterial, DestinationDescriptor, FailureDetail, LARGE_FILE_THRESHOLD, LearningAggregate,
    LearningSnapshot, MIB, OutcomeRecord, OutcomeStatus, Priority, Protocol, RunRecord, RunStatus,
    SMALL_FILE_LIMIT, SizeBucket, SourceLocator, SourceMetadata, Strategy, TransferClass,
    TransferOutcome, TransferPlan, TransferRequest, TransferResult, is_text_like,
};
pub use payload::{ChunkPayload, IntegrityHasher, PayloadEncoding, sha256_hex};
pub use service::{
    Clock, DestinationConnection, DestinationConnector, DestinationReceipt, NotificationEvent,
    Notifier, ObjectSource, RunLedger, SessionProbe, SystemClock, TicketStatus, TicketingSystem,
};
