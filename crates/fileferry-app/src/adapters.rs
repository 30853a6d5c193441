//! Filesystem-backed object source and destination.
//!
//! Buckets are directories under the source root and destination hosts are
//! directories under the destination root, so the binary can run a workflow
//! end to end without object-storage or FTP/SFTP clients.

use std::ffi::OsString;
use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileferry_core::{
    AccessMaterial, ChunkPayload, DestinationConnection, DestinationConnector,
    DestinationDescriptor, DestinationReceipt, IntegrityHasher, IoError, IoResult, ObjectSource,
    Protocol, SourceLocator, SourceMetadata,
};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

const DIGEST_SUFFIX: &str = ".sha256";
const READ_BUFFER_BYTES: usize = 1 << 20;

/// Object source reading `<root>/<bucket>/<key>`.
///
/// A sibling `<key>.sha256` file, when present, supplies the integrity tag.
#[derive(Debug, Clone)]
pub struct LocalObjectSource {
    root: PathBuf,
}

impl LocalObjectSource {
    /// Source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, locator: &SourceLocator) -> IoResult<PathBuf> {
        let bucket = join_relative(&self.root, &locator.bucket, "source.resolve")?;
        join_relative(&bucket, &locator.key, "source.resolve")
    }
}

#[async_trait]
impl ObjectSource for LocalObjectSource {
    async fn head(
        &self,
        locator: &SourceLocator,
        _material: &AccessMaterial,
    ) -> IoResult<SourceMetadata> {
        let path = self.resolve(locator)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|err| classify("source.head", &err))?;
        if !metadata.is_file() {
            return Err(IoError::not_found(
                "source.head",
                format!("{locator} is not a file"),
            ));
        }
        let last_modified = metadata
            .modified()
            .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);
        Ok(SourceMetadata {
            size_bytes: metadata.len(),
            content_type: content_type_for(&path).to_string(),
            last_modified,
            integrity_tag: read_digest_sidecar(&path).await,
        })
    }

    async fn read_range(
        &self,
        locator: &SourceLocator,
        _material: &AccessMaterial,
        offset: u64,
        length: u64,
    ) -> IoResult<Vec<u8>> {
        let path = self.resolve(locator)?;
        let mut file = File::open(&path)
            .await
            .map_err(|err| classify("source.read", &err))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| classify("source.read", &err))?;
        let mut buffer = Vec::with_capacity(usize::try_from(length).unwrap_or_default());
        file.take(length)
            .read_to_end(&mut buffer)
            .await
            .map_err(|err| classify("source.read", &err))?;
        Ok(buffer)
    }
}

/// Destination connector writing `<root>/<host>/<path>`.
#[derive(Debug, Clone)]
pub struct LocalDestinationConnector {
    root: PathBuf,
}

impl LocalDestinationConnector {
    /// Connector rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DestinationConnector for LocalDestinationConnector {
    async fn connect(
        &self,
        descriptor: &DestinationDescriptor,
        protocol: Protocol,
    ) -> IoResult<Arc<dyn DestinationConnection>> {
        let host = join_relative(&self.root, &descriptor.host, "destination.connect")?;
        let path = join_relative(&host, &descriptor.path, "destination.connect")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| classify("destination.connect", &err))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|err| classify("destination.connect", &err))?;
        debug!(
            path = %path.display(),
            protocol = protocol.as_str(),
            "local destination opened"
        );
        Ok(Arc::new(LocalConnection {
            file: Mutex::new(file),
        }))
    }
}

struct LocalConnection {
    file: Mutex<File>,
}

#[async_trait]
impl DestinationConnection for LocalConnection {
    async fn write_at(&self, offset: u64, payload: ChunkPayload) -> IoResult<()> {
        let raw = payload
            .into_raw()
            .map_err(|err| IoError::permanent("destination.decode", err.to_string()))?;
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| classify("destination.write", &err))?;
        file.write_all(&raw)
            .await
            .map_err(|err| classify("destination.write", &err))?;
        Ok(())
    }

    async fn finalize(&self) -> IoResult<DestinationReceipt> {
        let mut file = self.file.lock().await;
        file.flush()
            .await
            .map_err(|err| classify("destination.finalize", &err))?;
        file.sync_all()
            .await
            .map_err(|err| classify("destination.finalize", &err))?;
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|err| classify("destination.finalize", &err))?;

        let mut hasher = IntegrityHasher::new();
        let mut buffer = vec![0_u8; READ_BUFFER_BYTES];
        let mut bytes_written = 0_u64;
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|err| classify("destination.finalize", &err))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            bytes_written += read as u64;
        }
        drop(file);
        Ok(DestinationReceipt {
            bytes_written,
            digest: Some(hasher.finish_hex()),
        })
    }
}

/// Join `relative` under `base`, refusing anything that could escape it.
fn join_relative(base: &Path, relative: &str, operation: &'static str) -> IoResult<PathBuf> {
    let mut joined = base.to_path_buf();
    let mut pushed = false;
    for component in Path::new(relative.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(IoError::permanent(
                    operation,
                    format!("path {relative:?} leaves the storage root"),
                ));
            }
        }
    }
    if !pushed {
        return Err(IoError::permanent(operation, "empty path"));
    }
    Ok(joined)
}

fn classify(operation: &'static str, err: &io::Error) -> IoError {
    match err.kind() {
        io::ErrorKind::NotFound => IoError::not_found(operation, err.to_string()),
        io::ErrorKind::PermissionDenied
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::InvalidData
        | io::ErrorKind::IsADirectory
        | io::ErrorKind::NotADirectory => IoError::permanent(operation, err.to_string()),
        _ => IoError::transient(operation, err.to_string()),
    }
}

async fn read_digest_sidecar(path: &Path) -> Option<String> {
    let mut sidecar = OsString::from(path.as_os_str());
    sidecar.push(DIGEST_SUFFIX);
    let text = fs::read_to_string(PathBuf::from(sidecar)).await.ok()?;
    let digest = text.split_whitespace().next()?.to_ascii_lowercase();
    (digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())).then_some(digest)
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "csv" => "text/csv",
        "txt" | "log" => "text/plain",
        "tsv" => "text/tab-separated-values",
        "json" => "application/json",
        "ndjson" | "jsonl" => "application/x-ndjson",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "sql" => "application/sql",
        "html" | "htm" => "text/html",
        "gz" => "application/gzip",
        "zip" => "application/zip",
        "parquet" => "application/vnd.apache.parquet",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}
