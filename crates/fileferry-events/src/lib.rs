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

//! Workflow event bus.
//!
//! Runs publish typed lifecycle events; subscribers (log shippers, progress
//! views, tests) receive them through `tokio::broadcast`. A bounded replay
//! ring lets a subscriber that reconnects resume from the last id it saw.
//! When the channel overflows the oldest events are dropped.

pub mod payloads;
pub mod routing;

pub use payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId, WorkflowState};
pub use routing::{EventBus, EventStream};
