//! In-memory capabilities, collaborators and clocks with fault injection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use fileferry_core::{
    AccessMaterial, ChunkPayload, Clock, CollaboratorError, CollaboratorResult,
    DestinationConnection, DestinationConnector, DestinationDescriptor, DestinationReceipt,
    IoError, IoResult, NotificationEvent, Notifier, PayloadEncoding, Priority, Protocol,
    SessionProbe, SourceLocator, SourceMetadata, TicketStatus, TicketingSystem, TransferOutcome,
    sha256_hex,
};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

type WriteHook = Arc<dyn Fn(u64) + Send + Sync>;

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Clock frozen at the current wall time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: TimeDelta) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }

    /// Jump to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Probe whose answer tests flip directly.
#[derive(Debug)]
pub struct StaticProbe {
    valid: AtomicBool,
    checks: AtomicUsize,
}

impl StaticProbe {
    /// Probe that reports a valid session.
    #[must_use]
    pub const fn valid() -> Self {
        Self {
            valid: AtomicBool::new(true),
            checks: AtomicUsize::new(0),
        }
    }

    /// Change the reported validity.
    pub fn set(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    /// Number of times the probe was consulted.
    #[must_use]
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProbe for StaticProbe {
    async fn is_valid(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.valid.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Arc<Vec<u8>>,
    content_type: String,
    integrity_tag: Option<String>,
}

/// Object store held in memory, keyed by `bucket/key`.
#[derive(Debug, Default)]
pub struct MemoryObjectSource {
    objects: Mutex<HashMap<String, StoredObject>>,
    head_failures: AtomicU32,
    reads: AtomicUsize,
}

impl MemoryObjectSource {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` under `bucket/key`, tagged with their SHA-256.
    pub async fn insert(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: &str) {
        let tag = sha256_hex(&bytes);
        self.insert_with_tag(bucket, key, bytes, content_type, Some(tag))
            .await;
    }

    /// Store `bytes` with an explicit integrity tag.
    pub async fn insert_with_tag(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        integrity_tag: Option<String>,
    ) {
        self.objects.lock().await.insert(
            object_key(bucket, key),
            StoredObject {
                bytes: Arc::new(bytes),
                content_type: content_type.to_string(),
                integrity_tag,
            },
        );
    }

    /// Fail the next `times` metadata requests with a transient error.
    pub fn fail_head(&self, times: u32) {
        self.head_failures.store(times, Ordering::SeqCst);
    }

    /// Number of range reads served.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn object(
        &self,
        locator: &SourceLocator,
        operation: &'static str,
    ) -> IoResult<StoredObject> {
        self.objects
            .lock()
            .await
            .get(&object_key(&locator.bucket, &locator.key))
            .cloned()
            .ok_or_else(|| IoError::not_found(operation, locator.to_string()))
    }
}

#[async_trait]
impl fileferry_core::ObjectSource for MemoryObjectSource {
    async fn head(
        &self,
        locator: &SourceLocator,
        _material: &AccessMaterial,
    ) -> IoResult<SourceMetadata> {
        if take_one(&self.head_failures) {
            return Err(IoError::transient("source.head", "injected metadata failure"));
        }
        let object = self.object(locator, "source.head").await?;
        Ok(SourceMetadata {
            size_bytes: object.bytes.len() as u64,
            content_type: object.content_type,
            last_modified: Utc::now(),
            integrity_tag: object.integrity_tag,
        })
    }

    async fn read_range(
        &self,
        locator: &SourceLocator,
        _material: &AccessMaterial,
        offset: u64,
        length: u64,
    ) -> IoResult<Vec<u8>> {
        let object = self.object(locator, "source.read").await?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let total = object.bytes.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(total);
        let end = usize::try_from(offset.saturating_add(length))
            .unwrap_or(usize::MAX)
            .min(total);
        Ok(object.bytes[start..end].to_vec())
    }
}

#[derive(Debug, Clone, Copy)]
struct InjectedFault {
    remaining: u32,
    transient: bool,
}

/// One write observed by a [`MemoryDestination`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Raw offset of the write.
    pub offset: u64,
    /// Encoding used on the wire.
    pub encoding: PayloadEncoding,
    /// Bytes on the wire.
    pub encoded_len: u64,
    /// Bytes after decoding.
    pub raw_len: u64,
}

#[derive(Default)]
struct DestinationState {
    files: HashMap<String, Vec<u8>>,
    faults: HashMap<u64, InjectedFault>,
    delays: HashMap<u64, Duration>,
    hangs: HashSet<u64>,
    writes: Vec<WriteRecord>,
    connect_failures: u32,
    corrupt_digest: bool,
    on_write: Option<WriteHook>,
}

/// Destination that assembles files in memory, keyed by `host/path`.
#[derive(Default)]
pub struct MemoryDestination {
    state: Arc<Mutex<DestinationState>>,
    connects: AtomicUsize,
}

impl std::fmt::Debug for MemoryDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDestination").finish_non_exhaustive()
    }
}

impl MemoryDestination {
    /// Destination with no files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail writes at `offset` transiently for the next `times` attempts.
    pub async fn fail_transiently_at(&self, offset: u64, times: u32) {
        self.state.lock().await.faults.insert(
            offset,
            InjectedFault {
                remaining: times,
                transient: true,
            },
        );
    }

    /// Fail every write at `offset` with a permanent error.
    pub async fn fail_permanently_at(&self, offset: u64) {
        self.state.lock().await.faults.insert(
            offset,
            InjectedFault {
                remaining: u32::MAX,
                transient: false,
            },
        );
    }

    /// Hold writes at `offset` for `delay` before applying them.
    pub async fn delay_at(&self, offset: u64, delay: Duration) {
        self.state.lock().await.delays.insert(offset, delay);
    }

    /// Never complete writes at `offset`.
    pub async fn hang_at(&self, offset: u64) {
        self.state.lock().await.hangs.insert(offset);
    }

    /// Fail the next `times` connection attempts transiently.
    pub async fn fail_connects(&self, times: u32) {
        self.state.lock().await.connect_failures = times;
    }

    /// Report a digest that never matches the assembled bytes.
    pub async fn corrupt_digest(&self) {
        self.state.lock().await.corrupt_digest = true;
    }

    /// Invoke `hook` with the offset of every accepted write.
    pub async fn on_write(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        self.state.lock().await.on_write = Some(Arc::new(hook));
    }

    /// Assembled content at `host` + `path`.
    pub async fn file(&self, host: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .files
            .get(&object_key(host, path))
            .cloned()
    }

    /// Accepted writes in completion order.
    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().await.writes.clone()
    }

    /// Number of connection attempts, failed ones included.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationConnector for MemoryDestination {
    async fn connect(
        &self,
        descriptor: &DestinationDescriptor,
        _protocol: Protocol,
    ) -> IoResult<Arc<dyn DestinationConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(IoError::transient("destination.connect", "injected connect failure"));
        }
        let target = object_key(&descriptor.host, &descriptor.path);
        state.files.insert(target.clone(), Vec::new());
        Ok(Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            target,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<DestinationState>>,
    target: String,
}

#[async_trait]
impl DestinationConnection for MemoryConnection {
    async fn write_at(&self, offset: u64, payload: ChunkPayload) -> IoResult<()> {
        let delay = {
            let mut state = self.state.lock().await;
            if let Some(fault) = state.faults.get_mut(&offset)
                && fault.remaining > 0
            {
                fault.remaining -= 1;
                return Err(if fault.transient {
                    IoError::transient("destination.write", format!("injected fault at {offset}"))
                } else {
                    IoError::permanent("destination.write", format!("rejected write at {offset}"))
                });
            }
            if state.hangs.contains(&offset) {
                None
            } else {
                Some(state.delays.get(&offset).copied())
            }
        };
        let Some(delay) = delay else {
            return std::future::pending().await;
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let record = WriteRecord {
            offset,
            encoding: payload.encoding(),
            encoded_len: payload.encoded_len(),
            raw_len: payload.raw_len(),
        };
        let raw = payload
            .into_raw()
            .map_err(|err| IoError::permanent("destination.decode", err.to_string()))?;
        let hook = {
            let mut state = self.state.lock().await;
            let file = state.files.entry(self.target.clone()).or_default();
            let start = usize::try_from(offset)
                .map_err(|_| IoError::permanent("destination.write", "offset overflow"))?;
            let end = start + raw.len();
            if file.len() < end {
                file.resize(end, 0);
            }
            file[start..end].copy_from_slice(&raw);
            state.writes.push(record);
            state.on_write.clone()
        };
        if let Some(hook) = hook {
            hook(offset);
        }
        Ok(())
    }

    async fn finalize(&self) -> IoResult<DestinationReceipt> {
        let (file, corrupt) = {
            let state = self.state.lock().await;
            (
                state.files.get(&self.target).cloned().unwrap_or_default(),
                state.corrupt_digest,
            )
        };
        let digest = if corrupt {
            sha256_hex(b"corrupted")
        } else {
            sha256_hex(&file)
        };
        Ok(DestinationReceipt {
            bytes_written: file.len() as u64,
            digest: Some(digest),
        })
    }
}

/// One ticketing call observed by [`RecordingTicketing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketCall {
    /// `open` was called.
    Opened {
        /// Ticket summary.
        summary: String,
        /// Declared priority.
        priority: Priority,
    },
    /// `update` was called.
    Updated {
        /// Ticket identifier.
        ticket_id: String,
        /// Reported status.
        status: TicketStatus,
        /// Update text.
        detail: String,
    },
}

/// Ticketing system that records calls and can be told to fail or hang.
#[derive(Debug, Default)]
pub struct RecordingTicketing {
    calls: Mutex<Vec<TicketCall>>,
    failing: AtomicBool,
    hanging: AtomicBool,
    changed: Notify,
}

impl RecordingTicketing {
    /// Healthy ticketing system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail.
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Make every call block far beyond any collaborator timeout.
    pub fn hang_all(&self) {
        self.hanging.store(true, Ordering::SeqCst);
    }

    /// Calls received so far.
    pub async fn calls(&self) -> Vec<TicketCall> {
        self.calls.lock().await.clone()
    }

    /// Statuses passed to `update`, in order.
    pub async fn statuses(&self) -> Vec<TicketStatus> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                TicketCall::Updated { status, .. } => Some(*status),
                TicketCall::Opened { .. } => None,
            })
            .collect()
    }

    /// Wait until `count` calls were recorded, or `within` elapses.
    pub async fn wait_for_calls(&self, count: usize, within: Duration) -> bool {
        wait_until(&self.changed, within, || async move {
            self.calls.lock().await.len() >= count
        })
        .await
    }

    async fn enter(&self, call: TicketCall) -> CollaboratorResult<()> {
        if self.hanging.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        self.calls.lock().await.push(call);
        self.changed.notify_waiters();
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable {
                collaborator: "ticketing",
                detail: "injected outage".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TicketingSystem for RecordingTicketing {
    async fn open(
        &self,
        summary: &str,
        _detail: &str,
        priority: Priority,
    ) -> CollaboratorResult<String> {
        self.enter(TicketCall::Opened {
            summary: summary.to_string(),
            priority,
        })
        .await?;
        Ok(format!("TKT-{}", Uuid::new_v4().simple()))
    }

    async fn update(
        &self,
        ticket_id: &str,
        status: TicketStatus,
        detail: &str,
    ) -> CollaboratorResult<()> {
        self.enter(TicketCall::Updated {
            ticket_id: ticket_id.to_string(),
            status,
            detail: detail.to_string(),
        })
        .await
    }
}

/// One delivery observed by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Recipient address.
    pub recipient: String,
    /// Event type.
    pub event: NotificationEvent,
    /// Outcome carried by the notification.
    pub outcome: TransferOutcome,
}

/// Notifier that records deliveries and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<Delivery>>,
    failing: AtomicBool,
    delay_ms: AtomicU64,
    changed: Notify,
}

impl RecordingNotifier {
    /// Healthy notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail after it is recorded.
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Hold every delivery for `delay` before recording it.
    pub fn delay_all(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Deliveries received so far.
    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().await.clone()
    }

    /// Wait until `count` deliveries were recorded, or `within` elapses.
    pub async fn wait_for_deliveries(&self, count: usize, within: Duration) -> bool {
        wait_until(&self.changed, within, || async move {
            self.deliveries.lock().await.len() >= count
        })
        .await
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipient: &str,
        event: NotificationEvent,
        payload: &TransferOutcome,
    ) -> CollaboratorResult<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.deliveries.lock().await.push(Delivery {
            recipient: recipient.to_string(),
            event,
            outcome: payload.clone(),
        });
        self.changed.notify_waiters();
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable {
                collaborator: "notifier",
                detail: "injected outage".to_string(),
            });
        }
        Ok(())
    }
}

async fn wait_until<F, Fut>(changed: &Notify, within: Duration, mut ready: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(within, async {
        loop {
            let notified = changed.notified();
            if ready().await {
                return;
            }
            notified.await;
        }
    })
    .await
    .is_ok()
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

fn object_key(first: &str, second: &str) -> String {
    format!("{first}/{}", second.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileferry_core::ObjectSource;

    fn material() -> AccessMaterial {
        AccessMaterial {
            access_key_id: "ASIA".into(),
            secret_access_key: "s".into(),
            session_token: "t".into(),
            region: "us-east-1".into(),
        }
    }

    #[tokio::test]
    async fn source_serves_ranges_and_injected_head_failures() -> anyhow::Result<()> {
        let source = MemoryObjectSource::new();
        source.insert("b", "k", b"abcdef".to_vec(), "text/plain").await;
        let locator = SourceLocator {
            bucket: "b".into(),
            key: "k".into(),
        };
        source.fail_head(1);
        assert!(source.head(&locator, &material()).await.is_err());
        assert_eq!(source.head(&locator, &material()).await?.size_bytes, 6);
        assert_eq!(source.read_range(&locator, &material(), 4, 10).await?, b"ef");
        Ok(())
    }

    #[tokio::test]
    async fn destination_assembles_out_of_order_writes() -> anyhow::Result<()> {
        let destination = MemoryDestination::new();
        let descriptor = DestinationDescriptor {
            host: "h".into(),
            port: 22,
            protocol: "sftp".into(),
            path: "/out.bin".into(),
            credentials_ref: String::new(),
        };
        destination.fail_transiently_at(0, 1).await;
        let connection = destination.connect(&descriptor, Protocol::Sftp).await?;
        connection.write_at(3, ChunkPayload::gzip(b"def")?).await?;
        let first = connection
            .write_at(0, ChunkPayload::identity(b"abc".to_vec()))
            .await;
        assert!(first.is_err());
        connection
            .write_at(0, ChunkPayload::identity(b"abc".to_vec()))
            .await?;
        let receipt = connection.finalize().await?;
        assert_eq!(receipt.bytes_written, 6);
        assert_eq!(receipt.digest, Some(sha256_hex(b"abcdef")));
        assert_eq!(destination.file("h", "/out.bin").await, Some(b"abcdef".to_vec()));
        Ok(())
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now().timestamp_millis(), start.timestamp_millis());
        clock.advance(TimeDelta::seconds(10));
        assert_eq!(clock.now().timestamp_millis(), start.timestamp_millis() + 10_000);
    }
}
