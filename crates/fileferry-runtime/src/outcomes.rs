use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use fileferry_core::{
    LearningAggregate, LearningSnapshot, OutcomeRecord, Protocol, SizeBucket, StoreError,
    StoreResult, TransferClass,
};
use fileferry_learning::OutcomeStore;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::{clamp_i64, clamp_u64};

const INSERT_EVENT_SQL: &str = r"
    INSERT INTO fileferry_runtime.outcome_events (
        protocol,
        size_bucket,
        success,
        duration_ms,
        compression_ratio,
        bytes_transferred,
        recorded_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7)
";

const UPSERT_AGGREGATE_SQL: &str = r"
    INSERT INTO fileferry_runtime.learning_aggregates AS agg (
        protocol,
        size_bucket,
        attempts,
        successes,
        duration_sum_ms,
        compression_samples,
        compression_ratio_sum,
        last_updated
    )
    VALUES ($1, $2, 1, $3, $4, $5, $6, $7)
    ON CONFLICT (protocol, size_bucket) DO UPDATE
    SET
        attempts = agg.attempts + 1,
        successes = agg.successes + EXCLUDED.successes,
        duration_sum_ms = agg.duration_sum_ms + EXCLUDED.duration_sum_ms,
        compression_samples = agg.compression_samples + EXCLUDED.compression_samples,
        compression_ratio_sum = agg.compression_ratio_sum + EXCLUDED.compression_ratio_sum,
        last_updated = GREATEST(agg.last_updated, EXCLUDED.last_updated)
";

const SELECT_AGGREGATE_SQL: &str = r"
    SELECT
        protocol,
        size_bucket,
        attempts,
        successes,
        duration_sum_ms,
        compression_samples,
        compression_ratio_sum,
        last_updated
    FROM fileferry_runtime.learning_aggregates
    WHERE protocol = $1
      AND size_bucket = $2
";

const SELECT_ALL_AGGREGATES_SQL: &str = r"
    SELECT
        protocol,
        size_bucket,
        attempts,
        successes,
        duration_sum_ms,
        compression_samples,
        compression_ratio_sum,
        last_updated
    FROM fileferry_runtime.learning_aggregates
    ORDER BY protocol, size_bucket
";

const PRUNE_EVENTS_SQL: &str = r"
    DELETE FROM fileferry_runtime.outcome_events
    WHERE recorded_at < $1
";

/// Outcome store whose aggregates are updated by a single upsert per record.
#[derive(Clone, Debug)]
pub struct PgOutcomeStore {
    pool: PgPool,
    retention: TimeDelta,
}

impl PgOutcomeStore {
    pub(crate) fn new(pool: PgPool, retention: Duration) -> Self {
        Self {
            pool,
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
        }
    }
}

#[async_trait]
impl OutcomeStore for PgOutcomeStore {
    async fn record(&self, outcome: &OutcomeRecord) -> StoreResult<()> {
        let backend = |err: sqlx::Error| StoreError::backend("outcomes.record", err);
        let protocol = outcome.class.protocol.as_str();
        let bucket = outcome.class.size_bucket.as_str();
        let duration_ms =
            clamp_i64(u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX));
        let ratio = outcome.compression_ratio.filter(|ratio| ratio.is_finite());

        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(INSERT_EVENT_SQL)
            .bind(protocol)
            .bind(bucket)
            .bind(outcome.success)
            .bind(duration_ms)
            .bind(ratio)
            .bind(clamp_i64(outcome.bytes_transferred))
            .bind(outcome.recorded_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query(UPSERT_AGGREGATE_SQL)
            .bind(protocol)
            .bind(bucket)
            .bind(i64::from(outcome.success))
            .bind(duration_ms)
            .bind(i64::from(ratio.is_some()))
            .bind(ratio.unwrap_or_default())
            .bind(outcome.recorded_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        debug!(class = %outcome.class, success = outcome.success, "outcome recorded");
        Ok(())
    }

    async fn snapshot(&self, class: TransferClass) -> StoreResult<Option<LearningAggregate>> {
        let row = sqlx::query(SELECT_AGGREGATE_SQL)
            .bind(class.protocol.as_str())
            .bind(class.size_bucket.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| StoreError::backend("outcomes.snapshot", err))?;
        row.map(|row| decode_aggregate(&row)).transpose()
    }

    async fn snapshot_all(&self) -> StoreResult<LearningSnapshot> {
        let rows = sqlx::query(SELECT_ALL_AGGREGATES_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| StoreError::backend("outcomes.snapshot_all", err))?;
        let aggregates = rows
            .iter()
            .map(decode_aggregate)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(LearningSnapshot::from_aggregates(aggregates))
    }

    async fn prune(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = now
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let result = sqlx::query(PRUNE_EVENTS_SQL)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::backend("outcomes.prune", err))?;
        Ok(result.rows_affected())
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_aggregate(row: &PgRow) -> StoreResult<LearningAggregate> {
    let column = |err: sqlx::Error| StoreError::backend("outcomes.decode", err);
    let protocol_label: String = row.try_get("protocol").map_err(column)?;
    let protocol = Protocol::parse(&protocol_label).ok_or(StoreError::Malformed {
        operation: "outcomes.decode",
        field: "protocol",
        value: Some(protocol_label),
    })?;
    let bucket_label: String = row.try_get("size_bucket").map_err(column)?;
    let size_bucket = SizeBucket::parse(&bucket_label).ok_or(StoreError::Malformed {
        operation: "outcomes.decode",
        field: "size_bucket",
        value: Some(bucket_label),
    })?;

    let attempts = clamp_u64(row.try_get("attempts").map_err(column)?);
    let successes = clamp_u64(row.try_get("successes").map_err(column)?);
    let duration_sum_ms = clamp_u64(row.try_get("duration_sum_ms").map_err(column)?);
    let compression_samples = clamp_u64(row.try_get("compression_samples").map_err(column)?);
    let compression_ratio_sum: f64 = row.try_get("compression_ratio_sum").map_err(column)?;

    Ok(LearningAggregate {
        class: TransferClass::new(protocol, size_bucket),
        attempts,
        successes,
        average_duration: (attempts > 0)
            .then(|| Duration::from_millis(duration_sum_ms / attempts)),
        average_compression_ratio: (compression_samples > 0)
            .then(|| compression_ratio_sum / compression_samples as f64),
        last_updated: row.try_get("last_updated").map_err(column)?,
    })
}
