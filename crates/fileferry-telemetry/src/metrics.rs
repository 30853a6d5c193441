//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the transfer workflow reports on.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across components.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    runs_total: IntCounterVec,
    run_failures_total: IntCounterVec,
    events_emitted_total: IntCounterVec,
    collaborator_failures_total: IntCounterVec,
    bytes_transferred_total: IntCounter,
    chunk_retries_total: IntCounter,
    sessions_issued_total: IntCounter,
    sessions_revoked_total: IntCounter,
    active_runs: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Runs currently between `Validate` and a terminal state.
    pub active_runs: i64,
    /// Bytes written to destinations.
    pub bytes_transferred_total: u64,
    /// Chunk retries spent across all runs.
    pub chunk_retries_total: u64,
    /// Sessions issued by the credential broker.
    pub sessions_issued_total: u64,
    /// Sessions revoked by the credential broker.
    pub sessions_revoked_total: u64,
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::build(name, source))
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::build(name, source))
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::register(name, source))
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let runs_total = counter_vec(
            "fileferry_runs_total",
            "Workflow runs finished by terminal status",
            &["status"],
        )?;
        let run_failures_total = counter_vec(
            "fileferry_run_failures_total",
            "Failed workflow runs by error kind",
            &["kind"],
        )?;
        let events_emitted_total = counter_vec(
            "fileferry_events_emitted_total",
            "Workflow events emitted by type",
            &["type"],
        )?;
        let collaborator_failures_total = counter_vec(
            "fileferry_collaborator_failures_total",
            "Ticketing and notification calls that failed",
            &["collaborator"],
        )?;
        let bytes_transferred_total = counter(
            "fileferry_bytes_transferred_total",
            "Bytes written to destinations",
        )?;
        let chunk_retries_total = counter(
            "fileferry_chunk_retries_total",
            "Chunk attempts retried after transient failures",
        )?;
        let sessions_issued_total = counter(
            "fileferry_sessions_issued_total",
            "Ephemeral sessions issued",
        )?;
        let sessions_revoked_total = counter(
            "fileferry_sessions_revoked_total",
            "Ephemeral sessions revoked",
        )?;
        let active_runs = IntGauge::with_opts(Opts::new(
            "fileferry_active_runs",
            "Workflow runs in progress",
        ))
        .map_err(|source| TelemetryError::build("fileferry_active_runs", source))?;

        register(&registry, "fileferry_runs_total", &runs_total)?;
        register(&registry, "fileferry_run_failures_total", &run_failures_total)?;
        register(&registry, "fileferry_events_emitted_total", &events_emitted_total)?;
        register(
            &registry,
            "fileferry_collaborator_failures_total",
            &collaborator_failures_total,
        )?;
        register(
            &registry,
            "fileferry_bytes_transferred_total",
            &bytes_transferred_total,
        )?;
        register(&registry, "fileferry_chunk_retries_total", &chunk_retries_total)?;
        register(
            &registry,
            "fileferry_sessions_issued_total",
            &sessions_issued_total,
        )?;
        register(
            &registry,
            "fileferry_sessions_revoked_total",
            &sessions_revoked_total,
        )?;
        register(&registry, "fileferry_active_runs", &active_runs)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                runs_total,
                run_failures_total,
                events_emitted_total,
                collaborator_failures_total,
                bytes_transferred_total,
                chunk_retries_total,
                sessions_issued_total,
                sessions_revoked_total,
                active_runs,
            }),
        })
    }

    /// Count a finished run by status (`success` or `failed`).
    pub fn inc_run(&self, status: &str) {
        self.inner.runs_total.with_label_values(&[status]).inc();
    }

    /// Count a failed run by error kind.
    pub fn inc_run_failure(&self, kind: &str) {
        self.inner
            .run_failures_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Count a failed collaborator call.
    pub fn inc_collaborator_failure(&self, collaborator: &str) {
        self.inner
            .collaborator_failures_total
            .with_label_values(&[collaborator])
            .inc();
    }

    /// Add bytes written by a finished transfer.
    pub fn add_bytes_transferred(&self, bytes: u64) {
        self.inner.bytes_transferred_total.inc_by(bytes);
    }

    /// Add chunk retries spent by a transfer.
    pub fn add_chunk_retries(&self, retries: u32) {
        self.inner
            .chunk_retries_total
            .inc_by(u64::from(retries));
    }

    /// Count an issued session.
    pub fn inc_session_issued(&self) {
        self.inner.sessions_issued_total.inc();
    }

    /// Count a revoked session.
    pub fn inc_session_revoked(&self) {
        self.inner.sessions_revoked_total.inc();
    }

    /// Mark a run as started.
    pub fn run_started(&self) {
        self.inner.active_runs.inc();
    }

    /// Mark a run as finished.
    pub fn run_finished(&self) {
        self.inner.active_runs.dec();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Render { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::RenderEncoding { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_runs: self.inner.active_runs.get(),
            bytes_transferred_total: self.inner.bytes_transferred_total.get(),
            chunk_retries_total: self.inner.chunk_retries_total.get(),
            sessions_issued_total: self.inner.sessions_issued_total.get(),
            sessions_revoked_total: self.inner.sessions_revoked_total.get(),
        }
    }
}
