//! Typed configuration models.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Top-level engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Chunk retry and backoff policy.
    pub retry: RetrySettings,
    /// Extra chunk attempts for plain FTP destinations.
    pub ftp_extra_attempts: u32,
    /// Retries allowed for transient metadata fetch failures.
    pub metadata_retries: u32,
    /// Ceiling on each ticketing/notification call, in milliseconds.
    pub collaborator_timeout_ms: u64,
    /// Audit retention window for outcome records, in days.
    pub outcome_retention_days: u32,
    /// Accepted prefixes for upstream approval references.
    pub approval_prefixes: Vec<String>,
    /// Read grants the credential broker may issue.
    pub grants: Vec<GrantRule>,
    /// Recipient used when a request names none.
    pub notification_recipient: String,
    /// Region stamped on temporary access material.
    pub region: String,
    /// Logging configuration.
    pub telemetry: TelemetrySettings,
    /// Postgres connection string; memory-backed stores are used when absent.
    pub database_url: Option<String>,
    /// Roots for the local filesystem adapters.
    pub storage: LocalStorageSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            ftp_extra_attempts: defaults::FTP_EXTRA_ATTEMPTS,
            metadata_retries: defaults::METADATA_RETRIES,
            collaborator_timeout_ms: defaults::COLLABORATOR_TIMEOUT_MS,
            outcome_retention_days: defaults::OUTCOME_RETENTION_DAYS,
            approval_prefixes: defaults::APPROVAL_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
            grants: Vec::new(),
            notification_recipient: defaults::NOTIFICATION_RECIPIENT.to_string(),
            region: defaults::REGION.to_string(),
            telemetry: TelemetrySettings::default(),
            database_url: None,
            storage: LocalStorageSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Ceiling applied to each collaborator call.
    #[must_use]
    pub const fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    /// Audit retention window.
    #[must_use]
    pub const fn outcome_retention(&self) -> Duration {
        Duration::from_secs(self.outcome_retention_days as u64 * 86_400)
    }

    /// Retry policy for metadata fetches: the base policy with the metadata budget.
    #[must_use]
    pub fn metadata_retry(&self) -> RetrySettings {
        RetrySettings {
            max_attempts: self.metadata_retries.saturating_add(1),
            ..self.retry.clone()
        }
    }
}

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Growth factor applied per retry.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_backoff_ms: defaults::RETRY_INITIAL_BACKOFF_MS,
            backoff_multiplier: defaults::RETRY_BACKOFF_MULTIPLIER,
            max_backoff_ms: defaults::RETRY_MAX_BACKOFF_MS,
        }
    }
}

impl RetrySettings {
    /// Same policy with `extra` additional attempts.
    #[must_use]
    pub fn with_extra_attempts(&self, extra: u32) -> Self {
        Self {
            max_attempts: self.max_attempts.saturating_add(extra),
            ..self.clone()
        }
    }
}

/// One read grant: `requester` may read `bucket/prefix*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRule {
    /// Requester identity, or `*` for any requester.
    pub requester: String,
    /// Bucket covered by the grant.
    pub bucket: String,
    /// Key prefix covered by the grant; empty covers the whole bucket.
    #[serde(default)]
    pub prefix: String,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Log level directive.
    pub level: String,
    /// `pretty` or `json`; inferred from the build when absent.
    pub format: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: None,
        }
    }
}

/// Filesystem roots used by the local adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStorageSettings {
    /// Directory holding one sub-directory per bucket.
    pub source_root: Option<PathBuf>,
    /// Directory holding one sub-directory per destination host.
    pub destination_root: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = EngineSettings::default();
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.initial_backoff_ms, 100);
        assert!((settings.retry.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.metadata_retries, 2);
        let ftp = settings.retry.with_extra_attempts(settings.ftp_extra_attempts);
        assert_eq!(ftp.max_attempts, 5);
        assert_eq!(settings.approval_prefixes, vec!["REQ", "INC"]);
        assert_eq!(settings.outcome_retention(), Duration::from_secs(365 * 86_400));
    }

    #[test]
    fn metadata_retry_counts_the_first_attempt() {
        let settings = EngineSettings::default();
        assert_eq!(settings.metadata_retry().max_attempts, 3);
        assert_eq!(settings.retry.with_extra_attempts(1).max_attempts, 4);
    }
}
