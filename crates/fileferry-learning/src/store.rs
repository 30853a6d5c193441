//! Outcome persistence and aggregate snapshots.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use fileferry_core::{
    LearningAggregate, LearningSnapshot, OutcomeRecord, StoreResult, TransferClass,
};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::accumulator::Accumulator;

/// Shared store of transfer outcomes and per-class aggregates.
///
/// `record` must fold a record into its aggregate as one atomic step:
/// concurrent writers never lose an increment and readers never observe a
/// partially applied record.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Append `outcome` and fold it into its class aggregate.
    async fn record(&self, outcome: &OutcomeRecord) -> StoreResult<()>;

    /// Consistent aggregate for one class; `None` when the class has no history.
    async fn snapshot(&self, class: TransferClass) -> StoreResult<Option<LearningAggregate>>;

    /// Every aggregate, for planning and reporting.
    async fn snapshot_all(&self) -> StoreResult<LearningSnapshot>;

    /// Drop audit records older than the retention window; returns how many went.
    async fn prune(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// In-process outcome store.
#[derive(Debug)]
pub struct MemoryOutcomeStore {
    aggregates: RwLock<HashMap<TransferClass, Accumulator>>,
    audit: Mutex<VecDeque<OutcomeRecord>>,
    retention: TimeDelta,
}

impl MemoryOutcomeStore {
    /// Store keeping audit records for `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            aggregates: RwLock::new(HashMap::new()),
            audit: Mutex::new(VecDeque::new()),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Audit records currently retained, oldest first.
    pub async fn audit_log(&self) -> Vec<OutcomeRecord> {
        self.audit.lock().await.iter().cloned().collect()
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    async fn prune_audit(&self, now: DateTime<Utc>) -> u64 {
        let cutoff = self.cutoff(now);
        let mut audit = self.audit.lock().await;
        let before = audit.len();
        audit.retain(|record| record.recorded_at >= cutoff);
        (before - audit.len()) as u64
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn record(&self, outcome: &OutcomeRecord) -> StoreResult<()> {
        {
            let mut aggregates = self.aggregates.write().await;
            aggregates
                .entry(outcome.class)
                .or_insert_with(|| Accumulator::new(outcome.recorded_at))
                .fold(outcome);
        }
        self.audit.lock().await.push_back(outcome.clone());
        let pruned = self.prune_audit(outcome.recorded_at).await;
        debug!(
            class = %outcome.class,
            success = outcome.success,
            pruned,
            "outcome recorded"
        );
        Ok(())
    }

    async fn snapshot(&self, class: TransferClass) -> StoreResult<Option<LearningAggregate>> {
        Ok(self
            .aggregates
            .read()
            .await
            .get(&class)
            .map(|acc| acc.aggregate(class)))
    }

    async fn snapshot_all(&self) -> StoreResult<LearningSnapshot> {
        let aggregates = self.aggregates.read().await;
        Ok(LearningSnapshot::from_aggregates(
            aggregates.iter().map(|(class, acc)| acc.aggregate(*class)),
        ))
    }

    async fn prune(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        Ok(self.prune_audit(now).await)
    }
}
