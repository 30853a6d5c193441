use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileferry_core::{
    ErrorKind, RunLedger, RunRecord, RunStatus, SourceLocator, StoreError, StoreResult,
    TransferOutcome,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{clamp_i64, clamp_u64};

const INSERT_RUN_SQL: &str = r"
    INSERT INTO fileferry_runtime.runs (
        run_id,
        requester,
        approval_ref,
        source_bucket,
        source_key,
        destination_host,
        destination_path,
        status,
        started_at,
        bytes_transferred
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0)
    ON CONFLICT (run_id) DO NOTHING
";

const FINISH_RUN_SQL: &str = r"
    UPDATE fileferry_runtime.runs
    SET
        status = $2,
        finished_at = $3,
        bytes_transferred = $4,
        error_kind = $5
    WHERE run_id = $1
";

const SELECT_RUN_SQL: &str = r"
    SELECT
        run_id,
        requester,
        approval_ref,
        source_bucket,
        source_key,
        destination_host,
        destination_path,
        status,
        started_at,
        finished_at,
        bytes_transferred,
        error_kind
    FROM fileferry_runtime.runs
    WHERE run_id = $1
";

const SELECT_HISTORY_SQL: &str = r"
    SELECT
        run_id,
        requester,
        approval_ref,
        source_bucket,
        source_key,
        destination_host,
        destination_path,
        status,
        started_at,
        finished_at,
        bytes_transferred,
        error_kind
    FROM fileferry_runtime.runs
    WHERE requester = $1
    ORDER BY started_at DESC
    LIMIT $2
";

/// Run ledger persisted in Postgres.
#[derive(Clone, Debug)]
pub struct PgRunLedger {
    pool: PgPool,
}

impl PgRunLedger {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunLedger for PgRunLedger {
    async fn record_started(&self, record: &RunRecord) -> StoreResult<()> {
        sqlx::query(INSERT_RUN_SQL)
            .bind(record.run_id)
            .bind(&record.requester)
            .bind(&record.approval_ref)
            .bind(&record.source.bucket)
            .bind(&record.source.key)
            .bind(&record.destination_host)
            .bind(&record.destination_path)
            .bind(record.status.as_str())
            .bind(record.started_at)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::backend("runs.record_started", err))?;
        Ok(())
    }

    async fn record_finished(
        &self,
        run_id: Uuid,
        outcome: &TransferOutcome,
        finished_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let status = if outcome.is_success() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        sqlx::query(FINISH_RUN_SQL)
            .bind(run_id)
            .bind(status.as_str())
            .bind(finished_at)
            .bind(clamp_i64(outcome.bytes_transferred))
            .bind(outcome.error.as_ref().map(|error| error.kind.as_str()))
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::backend("runs.record_finished", err))?;
        Ok(())
    }

    async fn status(&self, run_id: Uuid) -> StoreResult<Option<RunRecord>> {
        let row = sqlx::query(SELECT_RUN_SQL)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| StoreError::backend("runs.status", err))?;
        row.map(|row| decode_run(&row)).transpose()
    }

    async fn history(&self, requester: &str, limit: usize) -> StoreResult<Vec<RunRecord>> {
        let rows = sqlx::query(SELECT_HISTORY_SQL)
            .bind(requester)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|err| StoreError::backend("runs.history", err))?;
        rows.iter().map(decode_run).collect()
    }
}

fn decode_run(row: &PgRow) -> StoreResult<RunRecord> {
    let column = |err: sqlx::Error| StoreError::backend("runs.decode", err);
    let status_label: String = row.try_get("status").map_err(column)?;
    let status = RunStatus::parse(&status_label).ok_or(StoreError::Malformed {
        operation: "runs.decode",
        field: "status",
        value: Some(status_label),
    })?;
    let error_kind = match row.try_get::<Option<String>, _>("error_kind").map_err(column)? {
        Some(label) => Some(ErrorKind::parse(&label).ok_or(StoreError::Malformed {
            operation: "runs.decode",
            field: "error_kind",
            value: Some(label),
        })?),
        None => None,
    };
    Ok(RunRecord {
        run_id: row.try_get("run_id").map_err(column)?,
        requester: row.try_get("requester").map_err(column)?,
        approval_ref: row.try_get("approval_ref").map_err(column)?,
        source: SourceLocator {
            bucket: row.try_get("source_bucket").map_err(column)?,
            key: row.try_get("source_key").map_err(column)?,
        },
        destination_host: row.try_get("destination_host").map_err(column)?,
        destination_path: row.try_get("destination_path").map_err(column)?,
        status,
        started_at: row.try_get("started_at").map_err(column)?,
        finished_at: row.try_get("finished_at").map_err(column)?,
        bytes_transferred: clamp_u64(row.try_get("bytes_transferred").map_err(column)?),
        error_kind,
    })
}
