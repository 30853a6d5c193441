//! Transfer domain types.

pub mod chunk;

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;
/// Files strictly below this size are `small`.
pub const SMALL_FILE_LIMIT: u64 = 10 * MIB;
/// Files at or above this size are `large`.
pub const LARGE_FILE_THRESHOLD: u64 = 1024 * MIB;

/// Destination wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain FTP.
    Ftp,
    /// SSH file transfer.
    Sftp,
}

impl Protocol {
    /// Lowercase protocol label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ftp => "ftp",
            Self::Sftp => "sftp",
        }
    }

    /// Parse a protocol label, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ftp" => Some(Self::Ftp),
            "sftp" => Some(Self::Sftp),
            _ => None,
        }
    }
}

/// Declared urgency of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default urgency.
    #[default]
    Normal,
    /// Expedited.
    High,
    /// Business critical.
    Critical,
}

impl Priority {
    /// Lowercase priority label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Bucket/key address of the source object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocator {
    /// Bucket name.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
}

impl Display for SourceLocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Where the file should land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationDescriptor {
    /// Destination host name.
    pub host: String,
    /// Destination port.
    pub port: u16,
    /// Requested protocol label; validated into a [`Protocol`].
    pub protocol: String,
    /// Target path on the destination host.
    pub path: String,
    /// Reference to destination credentials held by the connector.
    #[serde(default)]
    pub credentials_ref: String,
}

/// Immutable workflow input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Identity of the person or system asking for the transfer.
    pub requester: String,
    /// Upstream approval reference authorising this transfer.
    pub approval_ref: String,
    /// Object to copy.
    pub source: SourceLocator,
    /// Destination to copy to.
    pub destination: DestinationDescriptor,
    /// Declared priority.
    #[serde(default)]
    pub priority: Priority,
    /// Notification recipient; falls back to the configured default.
    #[serde(default)]
    pub recipient: Option<String>,
}

/// Size bucket used to key outcome statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeBucket {
    /// Under 10 MiB.
    Small,
    /// 10 MiB up to 1 GiB.
    Medium,
    /// 1 GiB and above.
    Large,
}

impl SizeBucket {
    /// Bucket a byte size.
    #[must_use]
    pub const fn classify(size_bytes: u64) -> Self {
        if size_bytes < SMALL_FILE_LIMIT {
            Self::Small
        } else if size_bytes < LARGE_FILE_THRESHOLD {
            Self::Medium
        } else {
            Self::Large
        }
    }

    /// Lowercase bucket label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    /// Parse a bucket label.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" => Some(Self::Large),
            _ => None,
        }
    }
}

/// (protocol, size bucket) pair keying learning aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferClass {
    /// Destination protocol.
    pub protocol: Protocol,
    /// Size bucket of the source object.
    pub size_bucket: SizeBucket,
}

impl TransferClass {
    /// Construct a class from its parts.
    #[must_use]
    pub const fn new(protocol: Protocol, size_bucket: SizeBucket) -> Self {
        Self {
            protocol,
            size_bucket,
        }
    }

    /// Class for a transfer of `size_bytes` over `protocol`.
    #[must_use]
    pub const fn for_size(protocol: Protocol, size_bytes: u64) -> Self {
        Self::new(protocol, SizeBucket::classify(size_bytes))
    }
}

impl Display for TransferClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol.as_str(), self.size_bucket.as_str())
    }
}

/// Facts about the source object, fetched once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Object size in bytes.
    pub size_bytes: u64,
    /// MIME content type reported by the store.
    pub content_type: String,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the object content when the store knows it.
    pub integrity_tag: Option<String>,
}

/// Whether a content type compresses well enough to be worth gzip on the wire.
#[must_use]
pub fn is_text_like(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence.starts_with("text/") {
        return true;
    }
    matches!(
        essence.as_str(),
        "application/json"
            | "application/x-ndjson"
            | "application/xml"
            | "application/csv"
            | "application/yaml"
            | "application/x-yaml"
            | "application/javascript"
            | "application/sql"
    ) || essence.ends_with("+json")
        || essence.ends_with("+xml")
}

/// Temporary, read-only access material minted for one session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMaterial {
    /// Access key identifier.
    pub access_key_id: String,
    /// Secret paired with the key identifier.
    pub secret_access_key: String,
    /// Session token bound to the grant.
    pub session_token: String,
    /// Region the grant applies to.
    pub region: String,
}

impl fmt::Debug for AccessMaterial {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessMaterial")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Shape of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One sequential stream.
    Single,
    /// Fixed-size byte ranges moved concurrently.
    Chunked,
}

impl Strategy {
    /// Lowercase strategy label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Chunked => "chunked",
        }
    }
}

/// Immutable plan computed once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferPlan {
    /// Single stream or chunked.
    pub strategy: Strategy,
    /// Chunk size; present only for chunked plans.
    pub chunk_size_bytes: Option<u64>,
    /// Maximum concurrent chunk workers, at least one.
    pub parallelism: usize,
    /// Whether chunks are gzip-encoded on the wire.
    pub compression: bool,
    /// Historical success rate for the class; `None` without history.
    pub predicted_success_probability: Option<f64>,
    /// Historical mean duration for the class; `None` without history.
    pub predicted_duration: Option<Duration>,
    /// Historical mean compression ratio when compressing.
    pub estimated_compression_ratio: Option<f64>,
}

impl TransferPlan {
    /// Number of chunk tasks this plan yields for `size_bytes`.
    #[must_use]
    pub const fn chunk_count(&self, size_bytes: u64) -> u64 {
        match self.chunk_size_bytes {
            Some(chunk) if chunk > 0 => size_bytes.div_ceil(chunk),
            _ if size_bytes == 0 => 0,
            _ => 1,
        }
    }
}

/// Result of a successful `execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Raw bytes written to the destination.
    pub bytes_transferred: u64,
    /// Chunk (or stream window) count.
    pub chunk_count: u64,
    /// Retries spent across all chunks.
    pub retries: u32,
    /// Encoded-to-raw byte ratio when compression was applied.
    pub compression_ratio: Option<f64>,
    /// Wall-clock time spent executing.
    pub duration: Duration,
}

/// Append-only record of one finished attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Class the transfer belonged to.
    pub class: TransferClass,
    /// Whether the run succeeded.
    pub success: bool,
    /// Run duration.
    pub duration: Duration,
    /// Measured compression ratio, when compression ran.
    pub compression_ratio: Option<f64>,
    /// Bytes transferred before completion or failure.
    pub bytes_transferred: u64,
    /// When the record was produced.
    pub recorded_at: DateTime<Utc>,
}

/// Running summary of outcomes for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningAggregate {
    /// Aggregate key.
    pub class: TransferClass,
    /// Recorded attempts.
    pub attempts: u64,
    /// Recorded successes.
    pub successes: u64,
    /// Mean duration across attempts.
    pub average_duration: Option<Duration>,
    /// Mean compression ratio across attempts that compressed.
    pub average_compression_ratio: Option<f64>,
    /// Time of the most recent update.
    pub last_updated: DateTime<Utc>,
}

impl LearningAggregate {
    /// Fraction of attempts that succeeded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.successes as f64 / self.attempts as f64)
    }
}

/// Point-in-time view of aggregates handed to the strategy selector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearningSnapshot {
    aggregates: BTreeMap<TransferClass, LearningAggregate>,
}

impl LearningSnapshot {
    /// Snapshot without any history.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from aggregates.
    pub fn from_aggregates(aggregates: impl IntoIterator<Item = LearningAggregate>) -> Self {
        Self {
            aggregates: aggregates
                .into_iter()
                .map(|aggregate| (aggregate.class, aggregate))
                .collect(),
        }
    }

    /// Aggregate for `class`, if any.
    #[must_use]
    pub fn get(&self, class: TransferClass) -> Option<&LearningAggregate> {
        self.aggregates.get(&class)
    }

    /// Number of classes with history.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    /// Whether no class has history.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}

/// Terminal status reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Bytes landed and verified.
    Success,
    /// The run ended in `Failed`.
    Failed,
}

/// Failure details attached to a failed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable explanation.
    pub detail: String,
    /// Chunk offsets implicated in the failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offsets: Vec<u64>,
}

impl FailureDetail {
    /// Failure without chunk offsets.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            offsets: Vec::new(),
        }
    }
}

/// Workflow output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Run identifier.
    pub run_id: Uuid,
    /// Terminal status.
    pub status: OutcomeStatus,
    /// End-to-end run duration.
    pub duration: Duration,
    /// Bytes written to the destination.
    pub bytes_transferred: u64,
    /// Plan the run executed, when one was selected.
    pub plan_used: Option<TransferPlan>,
    /// Failure details for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
}

impl TransferOutcome {
    /// Whether the run succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success)
    }
}

/// Lifecycle status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run has started and not reached a terminal state.
    Running,
    /// Run finished successfully.
    Succeeded,
    /// Run finished in `Failed`.
    Failed,
}

impl RunStatus {
    /// Lowercase status label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parse a status label.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Ledger entry describing one run for status and history queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: Uuid,
    /// Requester that submitted the run.
    pub requester: String,
    /// Approval reference used.
    pub approval_ref: String,
    /// Source object.
    pub source: SourceLocator,
    /// Destination host.
    pub destination_host: String,
    /// Destination path.
    pub destination_path: String,
    /// Current status.
    pub status: RunStatus,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Finish time, once terminal.
    pub finished_at: Option<DateTime<Utc>>,
    /// Bytes written.
    pub bytes_transferred: u64,
    /// Failure classification for failed runs.
    pub error_kind: Option<ErrorKind>,
}

impl RunRecord {
    /// New ledger entry for a run that is just starting.
    #[must_use]
    pub fn started(run_id: Uuid, request: &TransferRequest, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            requester: request.requester.clone(),
            approval_ref: request.approval_ref.clone(),
            source: request.source.clone(),
            destination_host: request.destination.host.clone(),
            destination_path: request.destination.path.clone(),
            status: RunStatus::Running,
            started_at,
            finished_at: None,
            bytes_transferred: 0,
            error_kind: None,
        }
    }

    /// Apply a terminal outcome to the entry.
    pub fn finish(&mut self, outcome: &TransferOutcome, finished_at: DateTime<Utc>) {
        self.status = if outcome.is_success() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        self.finished_at = Some(finished_at);
        self.bytes_transferred = outcome.bytes_transferred;
        self.error_kind = outcome.error.as_ref().map(|error| error.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_buckets_follow_thresholds() {
        assert_eq!(SizeBucket::classify(0), SizeBucket::Small);
        assert_eq!(SizeBucket::classify(SMALL_FILE_LIMIT - 1), SizeBucket::Small);
        assert_eq!(SizeBucket::classify(SMALL_FILE_LIMIT), SizeBucket::Medium);
        assert_eq!(
            SizeBucket::classify(LARGE_FILE_THRESHOLD - 1),
            SizeBucket::Medium
        );
        assert_eq!(
            SizeBucket::classify(LARGE_FILE_THRESHOLD),
            SizeBucket::Large
        );
    }

    #[test]
    fn protocol_parsing_is_case_insensitive() {
        assert_eq!(Protocol::parse(" SFTP "), Some(Protocol::Sftp));
        assert_eq!(Protocol::parse("ftp"), Some(Protocol::Ftp));
        assert_eq!(Protocol::parse("scp"), None);
    }

    #[test]
    fn text_like_detection_handles_parameters_and_suffixes() {
        assert!(is_text_like("text/csv"));
        assert!(is_text_like("text/plain; charset=utf-8"));
        assert!(is_text_like("application/json"));
        assert!(is_text_like("application/vnd.api+json"));
        assert!(!is_text_like("application/octet-stream"));
        assert!(!is_text_like("image/png"));
        assert!(!is_text_like(""));
    }

    #[test]
    fn access_material_debug_redacts_secrets() {
        let material = AccessMaterial {
            access_key_id: "AKIA".into(),
            secret_access_key: "very-secret".into(),
            session_token: "token-secret".into(),
            region: "us-east-1".into(),
        };
        let rendered = format!("{material:?}");
        assert!(rendered.contains("AKIA"));
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("token-secret"));
    }

    #[test]
    fn success_rate_is_absent_without_attempts() {
        let mut aggregate = LearningAggregate {
            class: TransferClass::new(Protocol::Sftp, SizeBucket::Medium),
            attempts: 0,
            successes: 0,
            average_duration: None,
            average_compression_ratio: None,
            last_updated: Utc::now(),
        };
        assert_eq!(aggregate.success_rate(), None);
        aggregate.attempts = 4;
        aggregate.successes = 3;
        assert_eq!(aggregate.success_rate(), Some(0.75));
    }

    #[test]
    fn chunk_count_rounds_up() {
        let plan = TransferPlan {
            strategy: Strategy::Chunked,
            chunk_size_bytes: Some(10),
            parallelism: 4,
            compression: false,
            predicted_success_probability: None,
            predicted_duration: None,
            estimated_compression_ratio: None,
        };
        assert_eq!(plan.chunk_count(0), 0);
        assert_eq!(plan.chunk_count(10), 1);
        assert_eq!(plan.chunk_count(11), 2);
    }

    #[test]
    fn outcome_serialises_with_snake_case_kind() -> anyhow::Result<()> {
        let outcome = TransferOutcome {
            run_id: Uuid::nil(),
            status: OutcomeStatus::Failed,
            duration: Duration::from_millis(5),
            bytes_transferred: 0,
            plan_used: None,
            error: Some(FailureDetail {
                kind: ErrorKind::ChunkExhausted,
                detail: "boom".into(),
                offsets: vec![20],
            }),
        };
        let value = serde_json::to_value(&outcome)?;
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"]["kind"], "chunk_exhausted");
        assert_eq!(value["error"]["offsets"][0], 20);
        Ok(())
    }
}
