//! In-process run ledger used when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileferry_core::{RunLedger, RunRecord, StoreResult, TransferOutcome};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Run ledger held in memory for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: RwLock<HashMap<Uuid, RunRecord>>,
}

impl MemoryRunLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn record_started(&self, record: &RunRecord) -> StoreResult<()> {
        self.runs
            .write()
            .await
            .entry(record.run_id)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn record_finished(
        &self,
        run_id: Uuid,
        outcome: &TransferOutcome,
        finished_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if let Some(record) = self.runs.write().await.get_mut(&run_id) {
            record.finish(outcome, finished_at);
        } else {
            debug!(%run_id, "finish recorded for unknown run");
        }
        Ok(())
    }

    async fn status(&self, run_id: Uuid) -> StoreResult<Option<RunRecord>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn history(&self, requester: &str, limit: usize) -> StoreResult<Vec<RunRecord>> {
        let mut runs: Vec<RunRecord> = self
            .runs
            .read()
            .await
            .values()
            .filter(|record| record.requester == requester)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use fileferry_core::{
        DestinationDescriptor, OutcomeStatus, Priority, RunStatus, SourceLocator,
        TransferRequest,
    };
    use std::time::Duration;

    fn request(requester: &str) -> TransferRequest {
        TransferRequest {
            requester: requester.into(),
            approval_ref: "REQ-9".into(),
            source: SourceLocator {
                bucket: "exports".into(),
                key: "a.csv".into(),
            },
            destination: DestinationDescriptor {
                host: "partner".into(),
                port: 22,
                protocol: "sftp".into(),
                path: "/in/a.csv".into(),
                credentials_ref: String::new(),
            },
            priority: Priority::Low,
            recipient: None,
        }
    }

    #[tokio::test]
    async fn history_is_newest_first_and_per_requester() -> anyhow::Result<()> {
        let ledger = MemoryRunLedger::new();
        let start = Utc::now();
        let mut ids = Vec::new();
        for offset in 0..3 {
            let run_id = Uuid::new_v4();
            ids.push(run_id);
            let record =
                RunRecord::started(run_id, &request("alice"), start + TimeDelta::seconds(offset));
            ledger.record_started(&record).await?;
        }
        ledger
            .record_started(&RunRecord::started(Uuid::new_v4(), &request("bob"), start))
            .await?;

        let history = ledger.history("alice", 2).await?;
        let seen: Vec<Uuid> = history.iter().map(|record| record.run_id).collect();
        assert_eq!(seen, vec![ids[2], ids[1]]);
        Ok(())
    }

    #[tokio::test]
    async fn finish_applies_the_outcome() -> anyhow::Result<()> {
        let ledger = MemoryRunLedger::new();
        let run_id = Uuid::new_v4();
        ledger
            .record_started(&RunRecord::started(run_id, &request("alice"), Utc::now()))
            .await?;
        let outcome = TransferOutcome {
            run_id,
            status: OutcomeStatus::Success,
            duration: Duration::from_millis(40),
            bytes_transferred: 99,
            plan_used: None,
            error: None,
        };
        ledger.record_finished(run_id, &outcome, Utc::now()).await?;
        let record = ledger.status(run_id).await?.expect("recorded");
        assert_eq!(record.status, RunStatus::Succeeded);
        assert_eq!(record.bytes_transferred, 99);
        assert!(record.finished_at.is_some());
        Ok(())
    }
}
