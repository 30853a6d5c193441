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

//! Transfer planning and execution.
//!
//! [`StrategySelector`] turns source metadata and historical aggregates into
//! an immutable [`fileferry_core::TransferPlan`]; [`TransferExecutor`] carries
//! the plan out against an object source and a destination connection while
//! the owning session stays valid.

pub mod executor;
pub mod retry;
pub mod strategy;

pub use executor::{ProgressHandle, SourceHandle, TransferExecutor};
pub use retry::{backoff_delay, retry_transient};
pub use strategy::StrategySelector;
