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

//! Historical transfer outcomes.
//!
//! Every finished run contributes one [`fileferry_core::OutcomeRecord`]. The
//! store folds it into the aggregate for its (protocol, size bucket) class
//! and keeps the raw record in a bounded audit log.

mod accumulator;
pub mod store;

pub use store::{MemoryOutcomeStore, OutcomeStore};
