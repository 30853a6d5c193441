//! Exponential backoff shared by chunk workers and workflow steps.

use std::time::Duration;

use fileferry_config::RetrySettings;
use fileferry_core::IoResult;
use tracing::warn;

/// Delay before retry number `retry_index` (zero-based): `initial * multiplier^index`, capped.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn backoff_delay(settings: &RetrySettings, retry_index: u32) -> Duration {
    let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
    let scaled = settings.initial_backoff_ms as f64 * settings.backoff_multiplier.powi(exponent);
    let capped = scaled.min(settings.max_backoff_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

/// Run `call` until it succeeds, fails permanently, or uses up `settings.max_attempts`.
///
/// Only transient failures are retried.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient error once
/// the attempt budget is spent.
pub async fn retry_transient<T, F, Fut>(
    settings: &RetrySettings,
    operation: &'static str,
    mut call: F,
) -> IoResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = IoResult<T>>,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = backoff_delay(settings, attempt - 1);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err.describe(),
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileferry_core::IoError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> RetrySettings {
        RetrySettings {
            max_attempts: 3,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 250,
        }
    }

    #[test]
    fn delays_double_until_capped() {
        let settings = settings();
        assert_eq!(backoff_delay(&settings, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&settings, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(&settings, 2), Duration::from_millis(250));
        assert_eq!(backoff_delay(&settings, 40), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_up_to_the_ceiling() {
        let calls = AtomicU32::new(0);
        let result: IoResult<()> = retry_transient(&settings(), "test.op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IoError::transient("test.op", "blip"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() -> anyhow::Result<()> {
        let calls = AtomicU32::new(0);
        let value = retry_transient(&settings(), "test.op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(IoError::transient("test.op", "blip"))
            } else {
                Ok(7)
            }
        })
        .await?;
        assert_eq!(value, 7);
        Ok(())
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: IoResult<()> = retry_transient(&settings(), "test.op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IoError::not_found("test.op", "missing"))
        })
        .await;
        assert!(matches!(result, Err(IoError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
