//! Plan execution against a source and a destination connection.
//!
//! # Design
//! - Chunks run through `buffer_unordered(plan.parallelism)` and are written
//!   at their own byte offset, so completion order never affects the result.
//! - The session probe is consulted before every attempt and again between
//!   the source read and the destination write; an invalid session halts all
//!   workers and no further write is issued.
//! - While an attempt is in flight the probe is polled every
//!   `session_poll`; if the session closes, the attempt is dropped mid-I/O.
//! - Transient failures are retried per chunk with exponential backoff; any
//!   other failure halts the transfer at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use fileferry_config::RetrySettings;
use fileferry_core::{
    AccessMaterial, ChunkPayload, ChunkTask, DestinationConnection, DestinationReceipt, IoError,
    IntegrityHasher, MIB, ObjectSource, SessionProbe, SourceLocator, SourceMetadata, Strategy,
    TransferError, TransferPlan, TransferResult,
};
use futures_util::{StreamExt, stream};
use tracing::{debug, warn};

use crate::retry::backoff_delay;

/// Window size for single-stream transfers.
pub const STREAM_WINDOW_BYTES: u64 = 4 * MIB;

/// How often an in-flight attempt re-checks its session.
pub const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything needed to read the source object for one run.
#[derive(Clone)]
pub struct SourceHandle {
    /// Object store client.
    pub source: Arc<dyn ObjectSource>,
    /// Object being copied.
    pub locator: SourceLocator,
    /// Metadata fetched at the start of the run.
    pub metadata: SourceMetadata,
    /// Session-scoped access material.
    pub material: AccessMaterial,
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("locator", &self.locator)
            .field("metadata", &self.metadata)
            .field("material", &self.material)
            .finish_non_exhaustive()
    }
}

/// Read-only view of the bytes-completed counter.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    bytes: Arc<AtomicU64>,
}

impl ProgressHandle {
    /// Raw bytes confirmed written so far; never decreases.
    #[must_use]
    pub fn bytes_completed(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Executes one transfer plan.
#[derive(Debug)]
pub struct TransferExecutor {
    retry: RetrySettings,
    stream_window: u64,
    session_poll: Duration,
    progress: Arc<AtomicU64>,
}

enum ChunkOutcome {
    Done { retries: u32, encoded: u64 },
    Exhausted { offset: u64, attempts: u32, last_error: String },
    Fatal { offset: u64, error: IoError },
    Aborted,
}

enum Attempt {
    Written { encoded: u64 },
    SessionLost,
}

struct ChunkRun<'a> {
    source: &'a SourceHandle,
    destination: &'a dyn DestinationConnection,
    session: &'a dyn SessionProbe,
    compression: bool,
    halt: &'a AtomicBool,
    expired: &'a AtomicBool,
}

impl TransferExecutor {
    /// Executor retrying transient failures under `retry`.
    #[must_use]
    pub fn new(retry: RetrySettings) -> Self {
        Self {
            retry,
            stream_window: STREAM_WINDOW_BYTES,
            session_poll: SESSION_POLL_INTERVAL,
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Override the single-stream window size.
    #[must_use]
    pub fn with_stream_window(mut self, bytes: u64) -> Self {
        self.stream_window = bytes.max(1);
        self
    }

    /// Override how often in-flight attempts re-check the session.
    #[must_use]
    pub fn with_session_poll(mut self, interval: Duration) -> Self {
        self.session_poll = interval.max(Duration::from_millis(1));
        self
    }

    /// Handle for reading progress concurrently with `execute`.
    #[must_use]
    pub fn progress(&self) -> ProgressHandle {
        ProgressHandle {
            bytes: Arc::clone(&self.progress),
        }
    }

    /// Carry out `plan`, copying the source into `destination`.
    ///
    /// # Errors
    ///
    /// - [`TransferError::SessionExpired`] when the probe reports the session invalid.
    /// - [`TransferError::ChunkExhausted`] when a chunk uses every attempt.
    /// - [`TransferError::TransferFailed`] for non-retryable I/O failures and
    ///   single-stream exhaustion.
    /// - [`TransferError::IntegrityMismatch`] when length or digest disagree.
    /// - [`TransferError::InvalidPlan`] for a chunked plan without a chunk size.
    pub async fn execute(
        &self,
        source: &SourceHandle,
        destination: Arc<dyn DestinationConnection>,
        plan: &TransferPlan,
        session: &dyn SessionProbe,
    ) -> Result<TransferResult, TransferError> {
        let started = Instant::now();
        let size = source.metadata.size_bytes;
        let layout = (plan.strategy, plan.chunk_size_bytes);
        let (chunk_count, retries, encoded, streamed_digest) = match layout {
            (Strategy::Chunked, Some(chunk_size)) => {
                let (count, retries, encoded) = self
                    .run_chunked(source, destination.as_ref(), plan, chunk_size, session)
                    .await?;
                (count, retries, encoded, None)
            }
            (Strategy::Chunked, None) => {
                return Err(TransferError::InvalidPlan {
                    reason: "chunked strategy without a chunk size",
                });
            }
            (Strategy::Single, _) => {
                let (count, retries, encoded, digest) = self
                    .run_stream(source, destination.as_ref(), plan.compression, session)
                    .await?;
                (count, retries, encoded, Some(digest))
            }
        };

        let receipt = destination
            .finalize()
            .await
            .map_err(|source| TransferError::TransferFailed {
                operation: "destination.finalize",
                failed_offsets: Vec::new(),
                source,
            })?;
        verify(&source.metadata, streamed_digest.as_deref(), &receipt)?;

        Ok(TransferResult {
            bytes_transferred: receipt.bytes_written,
            chunk_count,
            retries,
            compression_ratio: compression_ratio(plan.compression, encoded, size),
            duration: started.elapsed(),
        })
    }

    async fn run_chunked(
        &self,
        source: &SourceHandle,
        destination: &dyn DestinationConnection,
        plan: &TransferPlan,
        chunk_size: u64,
        session: &dyn SessionProbe,
    ) -> Result<(u64, u32, u64), TransferError> {
        let tasks = ChunkTask::partition(source.metadata.size_bytes, chunk_size);
        let chunk_count = tasks.len() as u64;
        debug!(
            key = %source.locator,
            chunks = chunk_count,
            chunk_size,
            parallelism = plan.parallelism,
            compression = plan.compression,
            "starting chunked transfer"
        );
        let halt = AtomicBool::new(false);
        let expired = AtomicBool::new(false);
        let run = ChunkRun {
            source,
            destination,
            session,
            compression: plan.compression,
            halt: &halt,
            expired: &expired,
        };

        let outcomes: Vec<Result<ChunkOutcome, TransferError>> = stream::iter(tasks)
            .map(|task| self.run_chunk(task, &run))
            .buffer_unordered(plan.parallelism.max(1))
            .collect()
            .await;

        if expired.load(Ordering::SeqCst) {
            return Err(TransferError::SessionExpired {
                bytes_completed: self.progress.load(Ordering::SeqCst),
            });
        }

        let mut retries = 0_u32;
        let mut encoded = 0_u64;
        let mut exhausted: Vec<(u64, u32, String)> = Vec::new();
        let mut fatal: Option<(u64, IoError)> = None;
        for outcome in outcomes {
            match outcome? {
                ChunkOutcome::Done {
                    retries: chunk_retries,
                    encoded: bytes,
                } => {
                    retries = retries.saturating_add(chunk_retries);
                    encoded += bytes;
                }
                ChunkOutcome::Exhausted {
                    offset,
                    attempts,
                    last_error,
                } => exhausted.push((offset, attempts, last_error)),
                ChunkOutcome::Fatal { offset, error } => {
                    if fatal.as_ref().is_none_or(|(first, _)| offset < *first) {
                        fatal = Some((offset, error));
                    }
                }
                ChunkOutcome::Aborted => {}
            }
        }

        if let Some((offset, source)) = fatal {
            return Err(TransferError::TransferFailed {
                operation: "transfer.chunk",
                failed_offsets: vec![offset],
                source,
            });
        }
        if !exhausted.is_empty() {
            exhausted.sort_by_key(|(offset, _, _)| *offset);
            let attempts = exhausted[0].1;
            let last_error = exhausted[0].2.clone();
            return Err(TransferError::ChunkExhausted {
                failed_offsets: exhausted.into_iter().map(|(offset, _, _)| offset).collect(),
                attempts,
                last_error,
            });
        }
        Ok((chunk_count, retries, encoded))
    }

    async fn run_chunk(
        &self,
        initial: ChunkTask,
        run: &ChunkRun<'_>,
    ) -> Result<ChunkOutcome, TransferError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut task = initial;
        loop {
            if run.halt.load(Ordering::SeqCst) {
                return Ok(ChunkOutcome::Aborted);
            }
            if !run.session.is_valid().await {
                run.expired.store(true, Ordering::SeqCst);
                run.halt.store(true, Ordering::SeqCst);
                return Ok(ChunkOutcome::Aborted);
            }
            task.begin_attempt()?;
            let attempt = self.attempt_window(
                run.source,
                run.destination,
                run.session,
                task.offset(),
                task.length(),
                run.compression,
                None,
            );
            let result = tokio::select! {
                biased;
                result = attempt => result,
                () = session_closed(run.session, self.session_poll) => Ok(Attempt::SessionLost),
            };
            match result {
                Ok(Attempt::Written { encoded }) => {
                    task.complete()?;
                    return Ok(ChunkOutcome::Done {
                        retries: task.attempt_count() - 1,
                        encoded,
                    });
                }
                Ok(Attempt::SessionLost) => {
                    run.expired.store(true, Ordering::SeqCst);
                    run.halt.store(true, Ordering::SeqCst);
                    return Ok(ChunkOutcome::Aborted);
                }
                Err(error) => {
                    task.fail(error.describe())?;
                    if !error.is_transient() {
                        run.halt.store(true, Ordering::SeqCst);
                        return Ok(ChunkOutcome::Fatal {
                            offset: task.offset(),
                            error,
                        });
                    }
                    if task.attempt_count() >= max_attempts {
                        run.halt.store(true, Ordering::SeqCst);
                        warn!(
                            offset = task.offset(),
                            attempts = task.attempt_count(),
                            error = %error.describe(),
                            "chunk retry ceiling reached"
                        );
                        return Ok(ChunkOutcome::Exhausted {
                            offset: task.offset(),
                            attempts: task.attempt_count(),
                            last_error: error.describe(),
                        });
                    }
                    let delay = backoff_delay(&self.retry, task.attempt_count() - 1);
                    warn!(
                        offset = task.offset(),
                        attempt = task.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error.describe(),
                        "chunk attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    task = task.retry()?;
                }
            }
        }
    }

    async fn run_stream(
        &self,
        source: &SourceHandle,
        destination: &dyn DestinationConnection,
        compression: bool,
        session: &dyn SessionProbe,
    ) -> Result<(u64, u32, u64, String), TransferError> {
        let size = source.metadata.size_bytes;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut hasher = IntegrityHasher::new();
        let mut offset = 0_u64;
        let mut windows = 0_u64;
        let mut retries = 0_u32;
        let mut encoded = 0_u64;
        debug!(key = %source.locator, size, "starting single-stream transfer");

        while offset < size {
            let length = self.stream_window.min(size - offset);
            let mut attempt = 1_u32;
            loop {
                if !session.is_valid().await {
                    return Err(self.expired());
                }
                let window = self.attempt_window(
                    source,
                    destination,
                    session,
                    offset,
                    length,
                    compression,
                    Some(&mut hasher),
                );
                let result = tokio::select! {
                    biased;
                    result = window => result,
                    () = session_closed(session, self.session_poll) => Ok(Attempt::SessionLost),
                };
                match result {
                    Ok(Attempt::Written { encoded: bytes }) => {
                        encoded += bytes;
                        break;
                    }
                    Ok(Attempt::SessionLost) => return Err(self.expired()),
                    Err(error) if error.is_transient() && attempt < max_attempts => {
                        let delay = backoff_delay(&self.retry, attempt - 1);
                        warn!(
                            offset,
                            attempt,
                            error = %error.describe(),
                            "stream window failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        retries = retries.saturating_add(1);
                    }
                    Err(error) => {
                        return Err(TransferError::TransferFailed {
                            operation: "transfer.stream",
                            failed_offsets: vec![offset],
                            source: error,
                        });
                    }
                }
            }
            offset += length;
            windows += 1;
        }
        Ok((windows, retries, encoded, hasher.finish_hex()))
    }

    // The hasher is only fed once the write lands, so retried windows are not hashed twice.
    #[allow(clippy::too_many_arguments)]
    async fn attempt_window(
        &self,
        source: &SourceHandle,
        destination: &dyn DestinationConnection,
        session: &dyn SessionProbe,
        offset: u64,
        length: u64,
        compression: bool,
        hasher: Option<&mut IntegrityHasher>,
    ) -> Result<Attempt, IoError> {
        let bytes = source
            .source
            .read_range(&source.locator, &source.material, offset, length)
            .await?;
        if bytes.len() as u64 != length {
            return Err(IoError::transient(
                "source.read",
                format!("short read at {offset}: {} of {length} bytes", bytes.len()),
            ));
        }
        if !session.is_valid().await {
            return Ok(Attempt::SessionLost);
        }
        let payload = if compression {
            ChunkPayload::gzip(&bytes)
                .map_err(|err| IoError::permanent("payload.encode", err.to_string()))?
        } else {
            ChunkPayload::identity(bytes.clone())
        };
        let encoded = payload.encoded_len();
        destination.write_at(offset, payload).await?;
        if let Some(hasher) = hasher {
            hasher.update(&bytes);
        }
        self.progress.fetch_add(length, Ordering::SeqCst);
        Ok(Attempt::Written { encoded })
    }

    fn expired(&self) -> TransferError {
        TransferError::SessionExpired {
            bytes_completed: self.progress.load(Ordering::SeqCst),
        }
    }
}

/// Resolves once `session` reports invalid, checking every `interval`.
async fn session_closed(session: &dyn SessionProbe, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if !session.is_valid().await {
            debug!("session closed while an attempt was in flight");
            return;
        }
    }
}

fn verify(
    metadata: &SourceMetadata,
    streamed_digest: Option<&str>,
    receipt: &DestinationReceipt,
) -> Result<(), TransferError> {
    if receipt.bytes_written != metadata.size_bytes {
        return Err(TransferError::IntegrityMismatch {
            field: "length",
            expected: metadata.size_bytes.to_string(),
            actual: receipt.bytes_written.to_string(),
        });
    }
    let expected = metadata.integrity_tag.as_deref().map(str::to_ascii_lowercase);
    if let (Some(expected), Some(streamed)) = (expected.as_deref(), streamed_digest)
        && expected != streamed
    {
        return Err(TransferError::IntegrityMismatch {
            field: "digest",
            expected: expected.to_string(),
            actual: streamed.to_string(),
        });
    }
    let reference = expected.as_deref().or(streamed_digest);
    if let (Some(reference), Some(actual)) = (reference, receipt.digest.as_deref())
        && !reference.eq_ignore_ascii_case(actual)
    {
        return Err(TransferError::IntegrityMismatch {
            field: "digest",
            expected: reference.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn compression_ratio(compression: bool, encoded: u64, raw: u64) -> Option<f64> {
    (compression && raw > 0).then(|| encoded as f64 / raw as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata(size_bytes: u64, tag: Option<&str>) -> SourceMetadata {
        SourceMetadata {
            size_bytes,
            content_type: "text/csv".into(),
            last_modified: Utc::now(),
            integrity_tag: tag.map(str::to_string),
        }
    }

    #[test]
    fn verify_checks_length_before_digest() {
        let receipt = DestinationReceipt {
            bytes_written: 9,
            digest: Some("aa".into()),
        };
        let err = verify(&metadata(10, Some("aa")), None, &receipt).expect_err("short");
        assert!(matches!(err, TransferError::IntegrityMismatch { field: "length", .. }));
    }

    #[test]
    fn verify_compares_streamed_and_receipt_digests() {
        let receipt = DestinationReceipt {
            bytes_written: 10,
            digest: Some("BB".into()),
        };
        assert!(verify(&metadata(10, Some("bb")), Some("bb"), &receipt).is_ok());
        assert!(verify(&metadata(10, None), Some("bb"), &receipt).is_ok());
        let err = verify(&metadata(10, Some("aa")), Some("bb"), &receipt).expect_err("tag");
        assert!(matches!(err, TransferError::IntegrityMismatch { field: "digest", .. }));
        let err = verify(&metadata(10, Some("aa")), None, &receipt).expect_err("receipt");
        assert!(matches!(err, TransferError::IntegrityMismatch { field: "digest", .. }));
    }

    #[test]
    fn ratio_only_when_compressing() {
        assert_eq!(compression_ratio(false, 10, 100), None);
        assert_eq!(compression_ratio(true, 10, 0), None);
        assert_eq!(compression_ratio(true, 25, 100), Some(0.25));
    }
}
