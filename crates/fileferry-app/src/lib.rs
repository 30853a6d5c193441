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

//! Fileferry application wiring.
//!
//! Layout: `orchestrator.rs` (workflow state machine), `bootstrap.rs`
//! (settings, stores and the binary entrypoint), `adapters.rs` and
//! `collaborators.rs` (local defaults for the capability traits).

/// Filesystem object source and destination connector.
pub mod adapters;
/// Settings loading, dependency wiring and the binary entrypoint.
pub mod bootstrap;
/// Log-backed ticketing and notification.
pub mod collaborators;
/// Application error type.
pub mod error;
/// In-memory run ledger.
pub mod ledger;
/// Transfer workflow state machine.
pub mod orchestrator;
/// Request shape checks.
pub mod validate;

pub use adapters::{LocalDestinationConnector, LocalObjectSource};
pub use bootstrap::{Args, build_deps, run_app};
pub use collaborators::{TracingNotifier, TracingTicketing};
pub use error::{AppError, AppResult};
pub use ledger::MemoryRunLedger;
pub use orchestrator::{WorkflowDeps, WorkflowOrchestrator};
pub use validate::{RequestError, validate_request};
