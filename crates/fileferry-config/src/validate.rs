//! Validation rules for engine settings.

use crate::error::{ConfigError, ConfigResult};
use crate::model::EngineSettings;

/// Check settings for values the engine cannot run with.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] naming the first offending field.
pub fn validate(settings: &EngineSettings) -> ConfigResult<()> {
    let retry = &settings.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::invalid(
            "retry",
            "max_attempts",
            Some(retry.max_attempts.to_string()),
            "must be at least 1",
        ));
    }
    if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::invalid(
            "retry",
            "backoff_multiplier",
            Some(retry.backoff_multiplier.to_string()),
            "must be a finite value >= 1.0",
        ));
    }
    if retry.initial_backoff_ms > retry.max_backoff_ms {
        return Err(ConfigError::invalid(
            "retry",
            "initial_backoff_ms",
            Some(retry.initial_backoff_ms.to_string()),
            "must not exceed max_backoff_ms",
        ));
    }
    if settings.collaborator_timeout_ms == 0 {
        return Err(ConfigError::invalid(
            "engine",
            "collaborator_timeout_ms",
            Some("0".to_string()),
            "must be positive",
        ));
    }
    if settings.approval_prefixes.is_empty()
        || settings
            .approval_prefixes
            .iter()
            .any(|prefix| prefix.trim().is_empty())
    {
        return Err(ConfigError::invalid(
            "credentials",
            "approval_prefixes",
            None,
            "must list at least one non-empty prefix",
        ));
    }
    for grant in &settings.grants {
        if grant.requester.trim().is_empty() {
            return Err(ConfigError::invalid(
                "credentials",
                "grants.requester",
                None,
                "must not be empty",
            ));
        }
        if grant.bucket.trim().is_empty() {
            return Err(ConfigError::invalid(
                "credentials",
                "grants.bucket",
                Some(grant.requester.clone()),
                "must not be empty",
            ));
        }
    }
    if settings.telemetry.level.trim().is_empty() {
        return Err(ConfigError::invalid(
            "telemetry",
            "level",
            None,
            "must not be empty",
        ));
    }
    if let Some(format) = settings.telemetry.format.as_deref()
        && !matches!(format, "json" | "pretty")
    {
        return Err(ConfigError::invalid(
            "telemetry",
            "format",
            Some(format.to_string()),
            "must be `json` or `pretty`",
        ));
    }
    Ok(())
}
