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

//! Engine configuration.
//!
//! Settings come from an optional YAML document (with `${VAR}` placeholders
//! resolved from the environment) overlaid with `FILEFERRY_*` variables, and
//! are validated before use.

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, substitute_placeholders};
pub use model::{EngineSettings, GrantRule, LocalStorageSettings, RetrySettings, TelemetrySettings};
pub use validate::validate;
