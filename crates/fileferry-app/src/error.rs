//! # Design
//!
//! - Bootstrap and query failures surface as `AppError`; run failures never do,
//!   they end as a failed `TransferOutcome` instead.
//! - Messages stay constant; context travels in fields.

use std::io;
use std::path::PathBuf;

use fileferry_core::StoreError;
use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Settings could not be loaded or failed validation.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: fileferry_config::ConfigError,
    },
    /// Logging or metrics could not be initialised.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: fileferry_telemetry::TelemetryError,
    },
    /// The Postgres runtime store could not be opened.
    #[error("runtime persistence failed")]
    Runtime {
        /// Operation identifier.
        operation: &'static str,
        /// Source runtime error.
        source: anyhow::Error,
    },
    /// A ledger or session store query failed.
    #[error("store query failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: StoreError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// A transfer request document could not be decoded.
    #[error("transfer request malformed")]
    RequestDecode {
        /// File the request was read from.
        path: PathBuf,
        /// Source JSON error.
        source: serde_json::Error,
    },
    /// An outcome could not be rendered.
    #[error("outcome encoding failed")]
    OutcomeEncode {
        /// Source JSON error.
        source: serde_json::Error,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: fileferry_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: fileferry_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn runtime(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Runtime { operation, source }
    }

    pub(crate) const fn store(operation: &'static str, source: StoreError) -> Self {
        Self::Store { operation, source }
    }
}
