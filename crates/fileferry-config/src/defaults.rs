//! Default values for engine settings.
//!
//! # Design
//! - Keep every tunable default in one place so documentation and code agree.
//! - Retry values are defaults only; deployments override them.

/// Attempts per chunk before the chunk is declared exhausted.
pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 3;
/// First backoff delay in milliseconds.
pub(crate) const RETRY_INITIAL_BACKOFF_MS: u64 = 100;
/// Backoff growth factor per attempt.
pub(crate) const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Upper bound on a single backoff delay in milliseconds.
pub(crate) const RETRY_MAX_BACKOFF_MS: u64 = 5_000;
/// Extra chunk attempts granted to plain FTP destinations.
pub(crate) const FTP_EXTRA_ATTEMPTS: u32 = 2;
/// Retries allowed for transient metadata fetch failures.
pub(crate) const METADATA_RETRIES: u32 = 2;
/// Ceiling on a single ticketing/notification call in milliseconds.
pub(crate) const COLLABORATOR_TIMEOUT_MS: u64 = 2_000;
/// Audit retention window for outcome records.
pub(crate) const OUTCOME_RETENTION_DAYS: u32 = 365;
/// Approval reference prefixes accepted by default.
pub(crate) const APPROVAL_PREFIXES: [&str; 2] = ["REQ", "INC"];
/// Recipient used when a request names none.
pub(crate) const NOTIFICATION_RECIPIENT: &str = "transfers@localhost";
/// Region stamped on temporary access material.
pub(crate) const REGION: &str = "us-east-1";
/// Default log level.
pub(crate) const LOG_LEVEL: &str = "info";
