use std::sync::Arc;
use std::time::Duration;

use fileferry_config::RetrySettings;
use fileferry_core::{
    AccessMaterial, DestinationConnector, DestinationDescriptor, ErrorKind, ObjectSource,
    PayloadEncoding, Protocol, SourceLocator, Strategy, TransferError, TransferPlan, sha256_hex,
};
use fileferry_test_support::fixtures::{csv_bytes, patterned_bytes};
use fileferry_test_support::mocks::{MemoryDestination, MemoryObjectSource, StaticProbe};
use fileferry_transfer::{SourceHandle, TransferExecutor};

const BUCKET: &str = "exports";
const HOST: &str = "partner";

fn retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 3,
        initial_backoff_ms: 1,
        backoff_multiplier: 2.0,
        max_backoff_ms: 5,
    }
}

fn material() -> AccessMaterial {
    AccessMaterial {
        access_key_id: "ASIATEST".into(),
        secret_access_key: "secret".into(),
        session_token: "token".into(),
        region: "us-east-1".into(),
    }
}

fn chunked(chunk_size: u64, parallelism: usize, compression: bool) -> TransferPlan {
    TransferPlan {
        strategy: Strategy::Chunked,
        chunk_size_bytes: Some(chunk_size),
        parallelism,
        compression,
        predicted_success_probability: None,
        predicted_duration: None,
        estimated_compression_ratio: None,
    }
}

fn single() -> TransferPlan {
    TransferPlan {
        strategy: Strategy::Single,
        chunk_size_bytes: None,
        parallelism: 1,
        compression: false,
        predicted_success_probability: None,
        predicted_duration: None,
        estimated_compression_ratio: None,
    }
}

struct Harness {
    source: Arc<MemoryObjectSource>,
    destination: Arc<MemoryDestination>,
    probe: Arc<StaticProbe>,
}

impl Harness {
    fn new() -> Self {
        Self {
            source: Arc::new(MemoryObjectSource::new()),
            destination: Arc::new(MemoryDestination::new()),
            probe: Arc::new(StaticProbe::valid()),
        }
    }

    async fn load(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> anyhow::Result<SourceHandle> {
        self.source.insert(BUCKET, key, bytes, content_type).await;
        let locator = SourceLocator {
            bucket: BUCKET.into(),
            key: key.into(),
        };
        let metadata = self.source.head(&locator, &material()).await?;
        Ok(SourceHandle {
            source: self.source.clone(),
            locator,
            metadata,
            material: material(),
        })
    }

    async fn run(
        &self,
        executor: &TransferExecutor,
        handle: &SourceHandle,
        plan: &TransferPlan,
    ) -> anyhow::Result<Result<fileferry_core::TransferResult, TransferError>> {
        let descriptor = DestinationDescriptor {
            host: HOST.into(),
            port: 22,
            protocol: "sftp".into(),
            path: format!("/in/{}", handle.locator.key),
            credentials_ref: String::new(),
        };
        let connection = self.destination.connect(&descriptor, Protocol::Sftp).await?;
        Ok(executor
            .execute(handle, connection, plan, self.probe.as_ref())
            .await)
    }

    async fn landed(&self, key: &str) -> Option<Vec<u8>> {
        self.destination.file(HOST, &format!("/in/{key}")).await
    }
}

#[tokio::test]
async fn out_of_order_completion_reassembles_identical_bytes() -> anyhow::Result<()> {
    let harness = Harness::new();
    let content = patterned_bytes(10 * 1_024 + 17);
    let handle = harness
        .load("blob.bin", content.clone(), "application/octet-stream")
        .await?;
    // Earlier offsets finish last.
    for index in 0..11_u64 {
        let delay = Duration::from_millis((11 - index) * 4);
        harness.destination.delay_at(index * 1_024, delay).await;
    }

    let executor = TransferExecutor::new(retry());
    let result = harness
        .run(&executor, &handle, &chunked(1_024, 4, false))
        .await??;

    assert_eq!(result.chunk_count, 11);
    assert_eq!(result.bytes_transferred, content.len() as u64);
    assert_eq!(result.compression_ratio, None);
    let landed = harness.landed("blob.bin").await.unwrap_or_default();
    assert_eq!(sha256_hex(&landed), sha256_hex(&content));

    let order: Vec<u64> = harness.destination.writes().await.iter().map(|w| w.offset).collect();
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_ne!(order, sorted, "writes should complete out of order");
    assert_eq!(executor.progress().bytes_completed(), content.len() as u64);
    Ok(())
}

#[tokio::test]
async fn chunk_recovers_after_two_transient_failures() -> anyhow::Result<()> {
    let harness = Harness::new();
    let handle = harness
        .load("ledger.bin", patterned_bytes(8_192), "application/octet-stream")
        .await?;
    harness.destination.fail_transiently_at(4_096, 2).await;

    let executor = TransferExecutor::new(retry());
    let result = harness
        .run(&executor, &handle, &chunked(2_048, 2, false))
        .await??;

    assert_eq!(result.retries, 2);
    assert_eq!(harness.landed("ledger.bin").await, Some(patterned_bytes(8_192)));
    Ok(())
}

#[tokio::test]
async fn exhausted_chunk_fails_the_transfer_with_its_offset() -> anyhow::Result<()> {
    let harness = Harness::new();
    let handle = harness
        .load("ledger.bin", patterned_bytes(8_192), "application/octet-stream")
        .await?;
    harness.destination.fail_transiently_at(6_144, 10).await;

    let executor = TransferExecutor::new(retry());
    let err = harness
        .run(&executor, &handle, &chunked(2_048, 1, false))
        .await?
        .expect_err("chunk exhausted");

    assert_eq!(err.kind(), ErrorKind::ChunkExhausted);
    assert_eq!(err.failed_offsets(), &[6_144]);
    assert!(matches!(err, TransferError::ChunkExhausted { attempts: 3, .. }));
    Ok(())
}

#[tokio::test]
async fn permanent_write_failure_is_not_retried() -> anyhow::Result<()> {
    let harness = Harness::new();
    let handle = harness
        .load("ledger.bin", patterned_bytes(4_096), "application/octet-stream")
        .await?;
    harness.destination.fail_permanently_at(0).await;

    let executor = TransferExecutor::new(retry());
    let err = harness
        .run(&executor, &handle, &chunked(2_048, 1, false))
        .await?
        .expect_err("permanent failure");

    assert_eq!(err.kind(), ErrorKind::TransferFailed);
    assert_eq!(err.failed_offsets(), &[0]);
    assert!(harness.destination.writes().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn session_loss_mid_transfer_stops_further_writes() -> anyhow::Result<()> {
    let harness = Harness::new();
    let handle = harness
        .load("big.bin", patterned_bytes(8 * 1_024), "application/octet-stream")
        .await?;
    let probe = Arc::clone(&harness.probe);
    harness
        .destination
        .on_write(move |_| probe.set(false))
        .await;

    let executor = TransferExecutor::new(retry());
    let err = harness
        .run(&executor, &handle, &chunked(1_024, 1, false))
        .await?
        .expect_err("session expired");

    assert_eq!(err.kind(), ErrorKind::SessionExpired);
    assert!(matches!(
        err,
        TransferError::SessionExpired {
            bytes_completed: 1_024
        }
    ));
    assert_eq!(harness.destination.writes().await.len(), 1);
    Ok(())
}

fn close_session_after(probe: &Arc<StaticProbe>, delay: Duration) {
    let probe = Arc::clone(probe);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        probe.set(false);
    });
}

#[tokio::test]
async fn hung_chunk_write_is_dropped_when_the_session_closes() -> anyhow::Result<()> {
    let harness = Harness::new();
    let handle = harness
        .load("big.bin", patterned_bytes(4 * 1_024), "application/octet-stream")
        .await?;
    harness.destination.hang_at(1_024).await;
    close_session_after(&harness.probe, Duration::from_millis(100));

    let executor = TransferExecutor::new(retry()).with_session_poll(Duration::from_millis(10));
    let err = tokio::time::timeout(
        Duration::from_secs(3),
        harness.run(&executor, &handle, &chunked(1_024, 2, false)),
    )
    .await??
    .expect_err("session expired");

    assert_eq!(err.kind(), ErrorKind::SessionExpired);
    assert!(matches!(
        err,
        TransferError::SessionExpired {
            bytes_completed: 3_072
        }
    ));
    let offsets: Vec<u64> = harness.destination.writes().await.iter().map(|w| w.offset).collect();
    assert!(!offsets.contains(&1_024));
    assert_eq!(executor.progress().bytes_completed(), 3_072);
    Ok(())
}

#[tokio::test]
async fn hung_stream_write_is_dropped_when_the_session_closes() -> anyhow::Result<()> {
    let harness = Harness::new();
    let handle = harness.load("small.csv", csv_bytes(2_000), "text/csv").await?;
    harness.destination.hang_at(0).await;
    close_session_after(&harness.probe, Duration::from_millis(100));

    let executor = TransferExecutor::new(retry()).with_session_poll(Duration::from_millis(10));
    let err = tokio::time::timeout(
        Duration::from_secs(3),
        harness.run(&executor, &handle, &single()),
    )
    .await??
    .expect_err("session expired");

    assert!(matches!(
        err,
        TransferError::SessionExpired { bytes_completed: 0 }
    ));
    assert!(harness.destination.writes().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn chunked_plan_without_a_chunk_size_is_rejected() -> anyhow::Result<()> {
    let harness = Harness::new();
    let handle = harness
        .load("ledger.bin", patterned_bytes(4_096), "application/octet-stream")
        .await?;
    let plan = TransferPlan {
        chunk_size_bytes: None,
        ..chunked(1_024, 2, false)
    };

    let executor = TransferExecutor::new(retry());
    let err = harness
        .run(&executor, &handle, &plan)
        .await?
        .expect_err("inconsistent plan");

    assert!(matches!(err, TransferError::InvalidPlan { .. }));
    assert_eq!(err.kind(), ErrorKind::TransferFailed);
    assert!(harness.destination.writes().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn text_chunks_travel_gzip_encoded() -> anyhow::Result<()> {
    let harness = Harness::new();
    let content = csv_bytes(64 * 1_024);
    let handle = harness.load("report.csv", content.clone(), "text/csv").await?;

    let executor = TransferExecutor::new(retry());
    let result = harness
        .run(&executor, &handle, &chunked(16 * 1_024, 4, true))
        .await??;

    let ratio = result.compression_ratio.unwrap_or(1.0);
    assert!(ratio < 0.9, "csv should compress, got {ratio}");
    let writes = harness.destination.writes().await;
    assert!(writes.iter().all(|w| w.encoding == PayloadEncoding::Gzip));
    assert_eq!(harness.landed("report.csv").await, Some(content));
    Ok(())
}

#[tokio::test]
async fn single_stream_hashes_and_verifies_the_tag() -> anyhow::Result<()> {
    let harness = Harness::new();
    let content = csv_bytes(5_000);
    let handle = harness.load("small.csv", content.clone(), "text/csv").await?;
    harness.destination.fail_transiently_at(2_000, 1).await;

    let executor = TransferExecutor::new(retry()).with_stream_window(1_000);
    let result = harness.run(&executor, &handle, &single()).await??;

    assert_eq!(result.chunk_count, 5);
    assert_eq!(result.retries, 1);
    assert_eq!(harness.landed("small.csv").await, Some(content));
    Ok(())
}

#[tokio::test]
async fn single_stream_rejects_a_mismatched_tag() -> anyhow::Result<()> {
    let harness = Harness::new();
    harness
        .source
        .insert_with_tag(
            BUCKET,
            "tampered.csv",
            csv_bytes(2_000),
            "text/csv",
            Some(sha256_hex(b"something else")),
        )
        .await;
    let locator = SourceLocator {
        bucket: BUCKET.into(),
        key: "tampered.csv".into(),
    };
    let metadata = harness.source.head(&locator, &material()).await?;
    let handle = SourceHandle {
        source: harness.source.clone(),
        locator,
        metadata,
        material: material(),
    };

    let executor = TransferExecutor::new(retry());
    let err = harness
        .run(&executor, &handle, &single())
        .await?
        .expect_err("tag mismatch");
    assert!(matches!(
        err,
        TransferError::IntegrityMismatch { field: "digest", .. }
    ));
    Ok(())
}

#[tokio::test]
async fn zero_byte_object_completes_without_writes() -> anyhow::Result<()> {
    let harness = Harness::new();
    let handle = harness.load("empty.csv", Vec::new(), "text/csv").await?;
    let executor = TransferExecutor::new(retry());
    let result = harness.run(&executor, &handle, &single()).await??;
    assert_eq!(result.bytes_transferred, 0);
    assert_eq!(harness.landed("empty.csv").await, Some(Vec::new()));
    Ok(())
}
