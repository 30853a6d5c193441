use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fileferry_config::{ConfigLoader, EngineSettings};
use fileferry_core::{Clock, RunLedger, SystemClock, TransferRequest};
use fileferry_credentials::{
    AllowlistAuthorizer, CredentialBroker, MemorySessionStore, SessionStore,
};
use fileferry_events::EventBus;
use fileferry_learning::{MemoryOutcomeStore, OutcomeStore};
use fileferry_runtime::RuntimeStore;
use fileferry_telemetry::{LogFormat, LoggingConfig, Metrics, build_sha, init_logging};
use tracing::{debug, info, warn};

use crate::adapters::{LocalDestinationConnector, LocalObjectSource};
use crate::collaborators::{TracingNotifier, TracingTicketing};
use crate::error::{AppError, AppResult};
use crate::ledger::MemoryRunLedger;
use crate::orchestrator::{WorkflowDeps, WorkflowOrchestrator};

const NOTIFICATION_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Command-line arguments for the `fileferry` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "fileferry", version, about = "Run one approved object transfer")]
pub struct Args {
    /// Settings file; `FILEFERRY_CONFIG` is consulted when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// JSON transfer request to run.
    #[arg(long)]
    pub request: PathBuf,
}

/// Entry point for the binary: load settings, run the request, print the outcome.
///
/// The exit code is non-zero when the run ends in `Failed`.
///
/// # Errors
///
/// Returns an error when settings, logging, stores or the request file cannot
/// be set up. A failed run is not an error.
pub async fn run_app() -> AppResult<ExitCode> {
    let args = Args::parse();
    let settings = load_settings(&args)?;
    init_logging(&LoggingConfig {
        level: &settings.telemetry.level,
        format: LogFormat::from_label(settings.telemetry.format.as_deref()),
        build_sha: build_sha(),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    info!(request = %args.request.display(), "fileferry starting");

    let request = read_request(&args.request).await?;
    let drain_timeout = settings.collaborator_timeout() + NOTIFICATION_DRAIN_GRACE;
    let orchestrator = WorkflowOrchestrator::new(build_deps(settings).await?);
    let outcome = orchestrator.run(request).await;
    let abandoned = orchestrator.drain_notifications(drain_timeout).await;
    debug!(abandoned, "notification delivery drained");

    let rendered = serde_json::to_string_pretty(&outcome)
        .map_err(|source| AppError::OutcomeEncode { source })?;
    println!("{rendered}");
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn load_settings(args: &Args) -> AppResult<EngineSettings> {
    let loader = ConfigLoader::from_process_env();
    match &args.config {
        Some(path) => loader.load_path(path),
        None => loader.load(),
    }
    .map_err(|err| AppError::config("config.load", err))
}

/// Wire the engine from `settings`.
///
/// Postgres backs sessions, outcomes and the run ledger when `database_url`
/// is set; otherwise everything lives in memory for the life of the process.
///
/// # Errors
///
/// Returns an error when the database or the metrics registry cannot be
/// initialised.
pub async fn build_deps(settings: EngineSettings) -> AppResult<WorkflowDeps> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let retention = settings.outcome_retention();

    let (sessions, outcomes, ledger): (
        Arc<dyn SessionStore>,
        Arc<dyn OutcomeStore>,
        Arc<dyn RunLedger>,
    ) = if let Some(url) = settings.database_url.as_deref() {
        let store = RuntimeStore::connect(url)
            .await
            .map_err(|err| AppError::runtime("runtime_store.connect", err))?;
        info!("postgres stores ready");
        (
            Arc::new(store.sessions()),
            Arc::new(store.outcomes(retention)),
            Arc::new(store.runs()),
        )
    } else {
        info!("no database configured; using in-memory stores");
        (
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryOutcomeStore::new(retention)),
            Arc::new(MemoryRunLedger::new()),
        )
    };

    let authorizer = AllowlistAuthorizer::new(settings.grants.clone(), settings.region.clone());
    let broker = Arc::new(CredentialBroker::new(
        sessions,
        Arc::new(authorizer),
        Arc::clone(&clock),
        settings.approval_prefixes.clone(),
    ));
    match broker.purge_expired().await {
        Ok(purged) => debug!(purged, "expired sessions purged"),
        Err(err) => warn!(error = %err, "expired session purge failed"),
    }

    let source_root = settings
        .storage
        .source_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let destination_root = settings
        .storage
        .destination_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

    Ok(WorkflowDeps {
        broker,
        outcomes,
        source: Arc::new(LocalObjectSource::new(source_root)),
        connector: Arc::new(LocalDestinationConnector::new(destination_root)),
        ticketing: Arc::new(TracingTicketing::new()),
        notifier: Arc::new(TracingNotifier),
        ledger,
        events: EventBus::new(),
        metrics,
        settings,
        clock,
    })
}

async fn read_request(path: &Path) -> AppResult<TransferRequest> {
    let bytes = tokio::fs::read(path).await.map_err(|source| AppError::Io {
        operation: "request.read",
        path: Some(path.to_path_buf()),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| AppError::RequestDecode {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileferry_config::{GrantRule, LocalStorageSettings};
    use fileferry_core::{ErrorKind, OutcomeStatus, RunStatus, sha256_hex};

    fn settings(root: &Path) -> EngineSettings {
        EngineSettings {
            grants: vec![GrantRule {
                requester: "alice".into(),
                bucket: "exports".into(),
                prefix: "daily/".into(),
            }],
            storage: LocalStorageSettings {
                source_root: Some(root.join("objects")),
                destination_root: Some(root.join("partners")),
            },
            ..EngineSettings::default()
        }
    }

    fn request_json(key: &str) -> String {
        serde_json::json!({
            "requester": "alice",
            "approval_ref": "REQ-2041",
            "source": { "bucket": "exports", "key": key },
            "destination": {
                "host": "partner",
                "port": 22,
                "protocol": "sftp",
                "path": "/inbound/report.csv",
                "credentials_ref": "vault:partner"
            },
            "priority": "normal"
        })
        .to_string()
    }

    #[test]
    fn args_require_a_request() {
        let args = Args::try_parse_from(["fileferry", "--request", "req.json"]);
        assert!(args.is_ok_and(|args| args.config.is_none()));
        assert!(Args::try_parse_from(["fileferry"]).is_err());
    }

    #[tokio::test]
    async fn memory_engine_runs_a_local_transfer() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let content = b"id,amount\n1,10\n2,20\n".repeat(64);
        let object_dir = root.path().join("objects/exports/daily");
        std::fs::create_dir_all(&object_dir)?;
        std::fs::write(object_dir.join("report.csv"), &content)?;
        std::fs::write(
            object_dir.join("report.csv.sha256"),
            sha256_hex(&content),
        )?;
        let request_path = root.path().join("request.json");
        std::fs::write(&request_path, request_json("daily/report.csv"))?;

        let orchestrator = WorkflowOrchestrator::new(build_deps(settings(root.path())).await?);
        let request = read_request(&request_path).await?;
        let outcome = orchestrator.run(request).await;

        assert_eq!(outcome.status, OutcomeStatus::Success, "{outcome:?}");
        assert_eq!(outcome.bytes_transferred, content.len() as u64);
        assert_eq!(orchestrator.drain_notifications(Duration::from_secs(1)).await, 0);
        let landed = std::fs::read(root.path().join("partners/partner/inbound/report.csv"))?;
        assert_eq!(landed, content);
        let record = orchestrator.status(outcome.run_id).await?;
        assert_eq!(record.map(|record| record.status), Some(RunStatus::Succeeded));
        Ok(())
    }

    #[tokio::test]
    async fn ungranted_keys_fail_authorization() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let request_path = root.path().join("request.json");
        std::fs::write(&request_path, request_json("monthly/report.csv"))?;

        let orchestrator = WorkflowOrchestrator::new(build_deps(settings(root.path())).await?);
        let outcome = orchestrator.run(read_request(&request_path).await?).await;
        let error = outcome.error.expect("failed run carries an error");
        assert_eq!(error.kind, ErrorKind::Authorization);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_request_files_are_reported() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let request_path = root.path().join("request.json");
        std::fs::write(&request_path, "{ not json")?;
        let err = read_request(&request_path).await.expect_err("malformed");
        assert!(matches!(err, AppError::RequestDecode { .. }));

        let missing = read_request(&root.path().join("absent.json"))
            .await
            .expect_err("missing");
        assert!(matches!(missing, AppError::Io { .. }));
        Ok(())
    }
}
