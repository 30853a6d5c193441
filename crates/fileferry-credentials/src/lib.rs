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

//! Ephemeral credential broker.
//!
//! Sessions are read-only grants that expire exactly ten seconds after
//! issuance. Validity is computed from the stored issuance window and the
//! revoked flag on every check; nothing extends a session.

pub mod authorizer;
pub mod broker;
pub mod error;
pub mod session;
pub mod store;

pub use authorizer::{AllowlistAuthorizer, Authorizer};
pub use broker::{CredentialBroker, SessionGuard};
pub use error::{CredentialError, CredentialResult};
pub use session::{SESSION_VALIDITY_SECS, Session, SessionInfo, SessionScope};
pub use store::{InsertOutcome, MemorySessionStore, SessionStore};
