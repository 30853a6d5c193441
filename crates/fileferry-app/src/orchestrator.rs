//! Workflow orchestrator: drives one transfer request from validation to a
//! terminal state.
//!
//! # Design
//! - The happy path walks `Validate → … → Notify → Done`; any step may divert
//!   to `Failed`, which releases the session, records a failed outcome and
//!   notifies before terminating. Cleanup failures are logged, never re-raised.
//! - Every run gets a fresh run id, session and plan; nothing carries over
//!   between runs of the same request.
//! - Ticketing calls are bounded by the collaborator timeout; notifications
//!   are spawned and never awaited by the run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use fileferry_config::{EngineSettings, RetrySettings};
use fileferry_core::{
    Clock, DestinationConnection, DestinationConnector, ErrorKind, FailureDetail, IoError,
    LearningSnapshot, NotificationEvent, Notifier, ObjectSource, OutcomeRecord, OutcomeStatus,
    Protocol, RunLedger, RunRecord, SessionProbe, SourceMetadata, TicketStatus, TicketingSystem,
    TransferClass, TransferError, TransferOutcome, TransferPlan, TransferRequest, TransferResult,
};
use fileferry_credentials::{CredentialBroker, Session, SessionGuard, SessionScope};
use fileferry_events::{Event, EventBus, WorkflowState};
use fileferry_learning::OutcomeStore;
use fileferry_telemetry::Metrics;
use fileferry_transfer::{
    ProgressHandle, SourceHandle, StrategySelector, TransferExecutor, retry_transient,
};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::validate::validate_request;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Collaborators and stores a workflow run depends on.
pub struct WorkflowDeps {
    /// Session issuer and validity authority.
    pub broker: Arc<CredentialBroker>,
    /// Learning aggregates feeding strategy selection.
    pub outcomes: Arc<dyn OutcomeStore>,
    /// Object storage.
    pub source: Arc<dyn ObjectSource>,
    /// FTP/SFTP destinations.
    pub connector: Arc<dyn DestinationConnector>,
    /// External ticketing system.
    pub ticketing: Arc<dyn TicketingSystem>,
    /// External notification channel.
    pub notifier: Arc<dyn Notifier>,
    /// Per-run status ledger.
    pub ledger: Arc<dyn RunLedger>,
    /// Lifecycle event bus.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
    /// Engine settings.
    pub settings: EngineSettings,
    /// Wall clock for records and ledgers.
    pub clock: Arc<dyn Clock>,
}

/// Runs transfer workflows; cheap to clone and share across tasks.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    deps: Arc<WorkflowDeps>,
    notifications: Arc<Mutex<JoinSet<()>>>,
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("broker", &self.deps.broker)
            .finish_non_exhaustive()
    }
}

/// Mutable state of one run.
struct RunContext {
    run_id: Uuid,
    request: TransferRequest,
    started: Instant,
    ticket: Option<String>,
    protocol: Option<Protocol>,
    session: Option<Session>,
    metadata: Option<SourceMetadata>,
    plan: Option<TransferPlan>,
    progress: Option<ProgressHandle>,
    result: Option<TransferResult>,
}

impl RunContext {
    fn class(&self) -> Option<TransferClass> {
        let protocol = self.protocol?;
        let metadata = self.metadata.as_ref()?;
        Some(TransferClass::for_size(protocol, metadata.size_bytes))
    }

    fn bytes_transferred(&self) -> u64 {
        self.result.as_ref().map_or_else(
            || {
                self.progress
                    .as_ref()
                    .map_or(0, ProgressHandle::bytes_completed)
            },
            |result| result.bytes_transferred,
        )
    }

    fn recipient<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.request
            .recipient
            .as_deref()
            .filter(|recipient| !recipient.trim().is_empty())
            .unwrap_or(fallback)
    }

    fn outcome(&self, error: Option<FailureDetail>) -> TransferOutcome {
        TransferOutcome {
            run_id: self.run_id,
            status: if error.is_none() {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Failed
            },
            duration: self.started.elapsed(),
            bytes_transferred: self.bytes_transferred(),
            plan_used: self.plan.clone(),
            error,
        }
    }
}

impl WorkflowOrchestrator {
    /// Orchestrator over `deps`.
    #[must_use]
    pub fn new(deps: WorkflowDeps) -> Self {
        Self {
            deps: Arc::new(deps),
            notifications: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Wait up to `timeout` for notifications still being delivered.
    ///
    /// Runs never wait on the notifier; call this before shutting the runtime
    /// down. Deliveries still pending at the deadline are aborted and counted
    /// in the return value.
    pub async fn drain_notifications(&self, timeout: Duration) -> usize {
        let mut pending = std::mem::take(&mut *self.lock_notifications());
        let drained = tokio::time::timeout(timeout, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        if drained.is_ok() {
            return 0;
        }
        let abandoned = pending.len();
        warn!(abandoned, "notifications still pending at shutdown");
        pending.abort_all();
        abandoned
    }

    fn lock_notifications(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Event bus runs publish to.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.deps.events
    }

    /// Metrics registry runs report to.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.deps.metrics
    }

    /// Run `request` on its own task.
    #[must_use]
    pub fn spawn(&self, request: TransferRequest) -> JoinHandle<TransferOutcome> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run(request).await })
    }

    /// Run `request` to a terminal state.
    ///
    /// Failures are reported in the returned outcome, never as an error.
    pub async fn run(&self, request: TransferRequest) -> TransferOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("workflow", %run_id, requester = %request.requester);
        self.drive(run_id, request).instrument(span).await
    }

    /// Ledger entry for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] when the ledger cannot be queried.
    pub async fn status(&self, run_id: Uuid) -> AppResult<Option<RunRecord>> {
        self.deps
            .ledger
            .status(run_id)
            .await
            .map_err(|err| AppError::store("ledger.status", err))
    }

    /// Most recent runs for `requester`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] when the ledger cannot be queried.
    pub async fn history(&self, requester: &str, limit: usize) -> AppResult<Vec<RunRecord>> {
        self.deps
            .ledger
            .history(requester, limit)
            .await
            .map_err(|err| AppError::store("ledger.history", err))
    }

    async fn drive(&self, run_id: Uuid, request: TransferRequest) -> TransferOutcome {
        let deps = &self.deps;
        deps.metrics.run_started();
        self.publish(Event::RunStarted {
            run_id,
            requester: request.requester.clone(),
            source: request.source.to_string(),
        });
        if let Err(err) = deps
            .ledger
            .record_started(&RunRecord::started(run_id, &request, deps.clock.now()))
            .await
        {
            warn!(error = %err, "failed to record run start");
        }

        let mut ctx = RunContext {
            run_id,
            request,
            started: Instant::now(),
            ticket: None,
            protocol: None,
            session: None,
            metadata: None,
            plan: None,
            progress: None,
            result: None,
        };
        ctx.ticket = self.open_ticket(&ctx).await;

        let outcome = match self.advance(&mut ctx).await {
            Ok(()) => self.complete(&mut ctx).await,
            Err(failure) => self.fail(&mut ctx, failure).await,
        };

        if let Err(err) = deps
            .ledger
            .record_finished(run_id, &outcome, deps.clock.now())
            .await
        {
            warn!(error = %err, "failed to record run finish");
        }
        deps.metrics.run_finished();
        outcome
    }

    /// Happy-path states up to and including `ExecuteTransfer`.
    async fn advance(&self, ctx: &mut RunContext) -> Result<(), FailureDetail> {
        self.enter(ctx, WorkflowState::Validate);
        let protocol = validate_request(&ctx.request)
            .map_err(|err| FailureDetail::new(ErrorKind::Validation, err.detail()))?;
        ctx.protocol = Some(protocol);

        self.enter(ctx, WorkflowState::AcquireCredential);
        let session = self.acquire(ctx).await?;
        ctx.session = Some(session);

        self.enter(ctx, WorkflowState::FetchMetadata);
        let handle = self.fetch_metadata(ctx).await?;

        self.enter(ctx, WorkflowState::SelectStrategy);
        let plan = self.select_strategy(ctx, &handle.metadata, protocol).await;
        ctx.plan = Some(plan.clone());

        self.enter(ctx, WorkflowState::ExecuteTransfer);
        let result = self.execute(ctx, &handle, &plan, protocol).await?;
        ctx.result = Some(result);
        Ok(())
    }

    async fn acquire(&self, ctx: &RunContext) -> Result<Session, FailureDetail> {
        let scope = SessionScope {
            run_id: ctx.run_id,
            approval_ref: ctx.request.approval_ref.trim().to_string(),
            bucket: ctx.request.source.bucket.clone(),
            key: ctx.request.source.key.clone(),
        };
        let session = self
            .deps
            .broker
            .issue(&ctx.request.requester, &scope)
            .await
            .map_err(|err| FailureDetail::new(err.kind(), err.detail()))?;
        self.deps.metrics.inc_session_issued();
        self.publish(Event::SessionIssued {
            run_id: ctx.run_id,
            token: session.token,
            expires_at: session.expires_at,
        });
        Ok(session)
    }

    async fn fetch_metadata(&self, ctx: &mut RunContext) -> Result<SourceHandle, FailureDetail> {
        let guard = self.guard(ctx)?;
        let material = self
            .deps
            .broker
            .material(guard.token())
            .await
            .map_err(|err| FailureDetail::new(err.kind(), err.detail()))?;
        let locator = ctx.request.source.clone();
        let source = Arc::clone(&self.deps.source);
        let metadata = retry_transient(&self.deps.settings.metadata_retry(), "source.head", || {
            let source = Arc::clone(&source);
            let locator = locator.clone();
            let material = material.clone();
            async move { source.head(&locator, &material).await }
        })
        .await
        .map_err(|err| io_failure(&err, ErrorKind::SourceNotFound))?;
        ensure_session(&guard).await?;
        debug!(
            size_bytes = metadata.size_bytes,
            content_type = %metadata.content_type,
            "source metadata fetched"
        );
        ctx.metadata = Some(metadata.clone());
        Ok(SourceHandle {
            source,
            locator,
            metadata,
            material,
        })
    }

    async fn select_strategy(
        &self,
        ctx: &RunContext,
        metadata: &SourceMetadata,
        protocol: Protocol,
    ) -> TransferPlan {
        let snapshot = match self.deps.outcomes.snapshot_all().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "learning snapshot unavailable; planning without history");
                LearningSnapshot::empty()
            }
        };
        let plan = StrategySelector::select(metadata, protocol, &snapshot);
        info!(
            strategy = plan.strategy.as_str(),
            chunk_size_bytes = plan.chunk_size_bytes,
            parallelism = plan.parallelism,
            compression = plan.compression,
            predicted_success_probability = plan.predicted_success_probability,
            "transfer plan selected"
        );
        self.publish(Event::PlanSelected {
            run_id: ctx.run_id,
            strategy: plan.strategy.as_str().to_string(),
            chunk_size_bytes: plan.chunk_size_bytes,
            parallelism: plan.parallelism,
            compression: plan.compression,
        });
        plan
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        handle: &SourceHandle,
        plan: &TransferPlan,
        protocol: Protocol,
    ) -> Result<TransferResult, FailureDetail> {
        let guard = self.guard(ctx)?;
        let settings = &self.deps.settings;
        let retry = match protocol {
            Protocol::Ftp => settings.retry.with_extra_attempts(settings.ftp_extra_attempts),
            Protocol::Sftp => settings.retry.clone(),
        };

        ensure_session(&guard).await?;
        let connection = self.connect(ctx, protocol, &retry).await?;
        ensure_session(&guard).await?;

        let executor = TransferExecutor::new(retry);
        let progress = executor.progress();
        ctx.progress = Some(progress.clone());
        let total = handle.metadata.size_bytes;

        let execution = executor.execute(handle, connection, plan, &guard);
        tokio::pin!(execution);
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        let mut reported = None;
        let outcome = loop {
            tokio::select! {
                outcome = &mut execution => break outcome,
                _ = ticker.tick() => {
                    let bytes_completed = progress.bytes_completed();
                    if reported != Some(bytes_completed) {
                        reported = Some(bytes_completed);
                        self.publish(Event::TransferProgress {
                            run_id: ctx.run_id,
                            bytes_completed,
                            bytes_total: total,
                        });
                    }
                }
            }
        };

        match outcome {
            Ok(result) => {
                self.publish(Event::TransferProgress {
                    run_id: ctx.run_id,
                    bytes_completed: result.bytes_transferred,
                    bytes_total: total,
                });
                self.deps.metrics.add_bytes_transferred(result.bytes_transferred);
                self.deps.metrics.add_chunk_retries(result.retries);
                info!(
                    bytes_transferred = result.bytes_transferred,
                    chunk_count = result.chunk_count,
                    retries = result.retries,
                    compression_ratio = result.compression_ratio,
                    "transfer finished"
                );
                Ok(result)
            }
            Err(err) => Err(transfer_failure(&err)),
        }
    }

    async fn connect(
        &self,
        ctx: &RunContext,
        protocol: Protocol,
        retry: &RetrySettings,
    ) -> Result<Arc<dyn DestinationConnection>, FailureDetail> {
        let connector = Arc::clone(&self.deps.connector);
        let descriptor = ctx.request.destination.clone();
        retry_transient(retry, "destination.connect", || {
            let connector = Arc::clone(&connector);
            let descriptor = descriptor.clone();
            async move { connector.connect(&descriptor, protocol).await }
        })
        .await
        .map_err(|err| io_failure(&err, ErrorKind::TransferFailed))
    }

    async fn complete(&self, ctx: &mut RunContext) -> TransferOutcome {
        self.enter(ctx, WorkflowState::RecordOutcome);
        self.record_outcome(ctx, true).await;

        self.enter(ctx, WorkflowState::ReleaseCredential);
        self.release(ctx).await;

        self.enter(ctx, WorkflowState::Notify);
        let outcome = ctx.outcome(None);
        self.notify(ctx, &outcome).await;

        self.enter(ctx, WorkflowState::Done);
        self.deps.metrics.inc_run("success");
        self.publish(Event::RunCompleted {
            run_id: ctx.run_id,
            bytes_transferred: outcome.bytes_transferred,
            duration_ms: millis(outcome.duration),
        });
        info!(
            bytes_transferred = outcome.bytes_transferred,
            duration_ms = millis(outcome.duration),
            "run completed"
        );
        outcome
    }

    async fn fail(&self, ctx: &mut RunContext, failure: FailureDetail) -> TransferOutcome {
        self.enter(ctx, WorkflowState::Failed);
        warn!(
            kind = failure.kind.as_str(),
            remediation = failure.kind.remediation().as_str(),
            detail = %failure.detail,
            "run failed"
        );
        self.release(ctx).await;
        self.record_outcome(ctx, false).await;

        let kind = failure.kind;
        let detail = failure.detail.clone();
        let outcome = ctx.outcome(Some(failure));
        self.notify(ctx, &outcome).await;

        self.deps.metrics.inc_run("failed");
        self.deps.metrics.inc_run_failure(kind.as_str());
        self.publish(Event::RunFailed {
            run_id: ctx.run_id,
            kind: kind.as_str().to_string(),
            detail,
        });
        outcome
    }

    /// Revoke the run's session if one was issued; never fails the run.
    async fn release(&self, ctx: &mut RunContext) {
        let Some(session) = ctx.session.take() else {
            return;
        };
        match self.deps.broker.revoke(session.token).await {
            Ok(()) => {
                self.deps.metrics.inc_session_revoked();
                self.publish(Event::SessionReleased {
                    run_id: ctx.run_id,
                    token: session.token,
                });
            }
            Err(err) => warn!(token = %session.token, error = %err, "session release failed"),
        }
    }

    /// Feed the run into the learning store; never fails the run.
    async fn record_outcome(&self, ctx: &RunContext, success: bool) {
        let Some(class) = ctx.class() else {
            debug!("no transfer class for run; outcome not recorded");
            return;
        };
        let record = OutcomeRecord {
            class,
            success,
            duration: ctx.started.elapsed(),
            compression_ratio: ctx
                .result
                .as_ref()
                .and_then(|result| result.compression_ratio),
            bytes_transferred: ctx.bytes_transferred(),
            recorded_at: self.deps.clock.now(),
        };
        if let Err(err) = self.deps.outcomes.record(&record).await {
            warn!(%class, error = %err, "outcome record failed");
        }
    }

    async fn open_ticket(&self, ctx: &RunContext) -> Option<String> {
        let summary = format!(
            "Transfer {} to {}",
            ctx.request.source, ctx.request.destination.host
        );
        let detail = format!(
            "run {} requested by {} under {}",
            ctx.run_id, ctx.request.requester, ctx.request.approval_ref
        );
        let timeout = self.deps.settings.collaborator_timeout();
        match tokio::time::timeout(
            timeout,
            self.deps.ticketing.open(&summary, &detail, ctx.request.priority),
        )
        .await
        {
            Ok(Ok(ticket_id)) => {
                debug!(%ticket_id, "ticket opened");
                Some(ticket_id)
            }
            Ok(Err(err)) => {
                self.collaborator_unavailable(ctx.run_id, "ticketing", &err.to_string());
                None
            }
            Err(_) => {
                self.collaborator_unavailable(ctx.run_id, "ticketing", "open timed out");
                None
            }
        }
    }

    async fn notify(&self, ctx: &RunContext, outcome: &TransferOutcome) {
        let (status, event, detail) = match &outcome.error {
            None => (
                TicketStatus::Resolved,
                NotificationEvent::TransferSucceeded,
                format!("{} bytes transferred", outcome.bytes_transferred),
            ),
            Some(error) => (
                TicketStatus::Failed,
                NotificationEvent::TransferFailed,
                format!("{}: {}", error.kind.as_str(), error.detail),
            ),
        };

        let timeout = self.deps.settings.collaborator_timeout();
        let notifier = Arc::clone(&self.deps.notifier);
        let recipient = ctx
            .recipient(&self.deps.settings.notification_recipient)
            .to_string();
        let payload = outcome.clone();
        let reporter = self.clone();
        let run_id = ctx.run_id;
        let delivery = async move {
            match tokio::time::timeout(timeout, notifier.notify(&recipient, event, &payload)).await
            {
                Ok(Ok(())) => debug!(%recipient, event = event.as_str(), "notification sent"),
                Ok(Err(err)) => {
                    reporter.collaborator_unavailable(run_id, "notifier", &err.to_string());
                }
                Err(_) => reporter.collaborator_unavailable(run_id, "notifier", "notify timed out"),
            }
        }
        .in_current_span();
        {
            let mut notifications = self.lock_notifications();
            while notifications.try_join_next().is_some() {}
            notifications.spawn(delivery);
        }

        let Some(ticket_id) = ctx.ticket.as_deref() else {
            return;
        };
        match tokio::time::timeout(
            timeout,
            self.deps.ticketing.update(ticket_id, status, &detail),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.collaborator_unavailable(ctx.run_id, "ticketing", &err.to_string());
            }
            Err(_) => self.collaborator_unavailable(ctx.run_id, "ticketing", "update timed out"),
        }
    }

    fn collaborator_unavailable(&self, run_id: Uuid, collaborator: &'static str, detail: &str) {
        warn!(collaborator, detail, "collaborator unavailable; continuing");
        self.deps.metrics.inc_collaborator_failure(collaborator);
        self.publish(Event::CollaboratorUnavailable {
            run_id,
            collaborator: collaborator.to_string(),
            detail: detail.to_string(),
        });
    }

    fn guard(&self, ctx: &RunContext) -> Result<SessionGuard, FailureDetail> {
        ctx.session
            .as_ref()
            .map(|session| self.deps.broker.guard(session.token))
            .ok_or_else(|| {
                FailureDetail::new(ErrorKind::SessionExpired, "no session held by the run")
            })
    }

    fn enter(&self, ctx: &RunContext, state: WorkflowState) {
        debug!(state = state.as_str(), "entering state");
        self.publish(Event::StateEntered {
            run_id: ctx.run_id,
            state,
        });
    }

    fn publish(&self, event: Event) {
        self.deps.metrics.inc_event(event.kind());
        let _ = self.deps.events.publish(event);
    }
}

async fn ensure_session(guard: &SessionGuard) -> Result<(), FailureDetail> {
    if guard.is_valid().await {
        Ok(())
    } else {
        Err(FailureDetail::new(
            ErrorKind::SessionExpired,
            format!("session {} is no longer valid", guard.token()),
        ))
    }
}

fn io_failure(err: &IoError, not_found: ErrorKind) -> FailureDetail {
    let kind = match err {
        IoError::NotFound { .. } => not_found,
        IoError::Transient { .. } => ErrorKind::TransientIo,
        IoError::Permanent { .. } => ErrorKind::TransferFailed,
    };
    FailureDetail::new(kind, err.describe())
}

fn transfer_failure(err: &TransferError) -> FailureDetail {
    FailureDetail {
        kind: err.kind(),
        detail: err.detail(),
        offsets: err.failed_offsets().to_vec(),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
