//! One-shot transfer of file bytes to a presigned destination.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::Client;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use vidra_core::models::UploadDestination;
use vidra_core::AppError;

/// Stream of body chunks read from a [`ByteSource`].
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Callback receiving the number of bytes sent so far in the current attempt.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

const MEMORY_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransferFailure {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transfer timed out")]
    Timeout,

    #[error("store rejected upload with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upload body interrupted: {0}")]
    Interrupted(String),

    #[error("failed to read source: {0}")]
    Source(String),

    #[error("destination expired")]
    Expired,

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferFailure {
    /// Network-class failures worth retrying from byte 0.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferFailure::Connect(_)
            | TransferFailure::Timeout
            | TransferFailure::Interrupted(_) => true,
            TransferFailure::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            TransferFailure::Source(_) | TransferFailure::Expired | TransferFailure::Cancelled => {
                false
            }
        }
    }

    pub fn into_app_error(self, attempts: u32) -> AppError {
        match self {
            TransferFailure::Cancelled => AppError::Cancelled,
            other => AppError::Transfer {
                attempts,
                message: other.to_string(),
            },
        }
    }
}

/// Readable, restartable source of the upload body.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total number of bytes `open` yields.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a fresh stream from byte 0.
    async fn open(&self) -> Result<ByteStream, TransferFailure>;
}

/// Body read from a file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn open(&self) -> Result<ByteStream, TransferFailure> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| TransferFailure::Source(format!("{}: {}", self.path.display(), e)))?;
        Ok(ReaderStream::new(file).boxed())
    }
}

/// Body held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn open(&self) -> Result<ByteStream, TransferFailure> {
        let data = self.data.clone();
        let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(MEMORY_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + MEMORY_CHUNK_SIZE).min(data.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

/// Performs the single write of the file bytes to the destination.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Write every byte of `source` to `destination`. Progress is reported as bytes are
    /// handed to the transport. Returns `Cancelled` promptly once `cancel` fires.
    async fn put(
        &self,
        destination: &UploadDestination,
        source: &dyn ByteSource,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<(), TransferFailure>;
}

/// `PUT` over HTTP with the destination's headers and an exact `Content-Length`.
#[derive(Debug, Clone)]
pub struct HttpTransferClient {
    client: Client,
}

impl HttpTransferClient {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn classify(err: reqwest::Error, source_failed: bool) -> TransferFailure {
    if source_failed {
        TransferFailure::Source(err.to_string())
    } else if err.is_timeout() {
        TransferFailure::Timeout
    } else if err.is_connect() {
        TransferFailure::Connect(err.to_string())
    } else {
        TransferFailure::Interrupted(err.to_string())
    }
}

fn destination_headers(destination: &UploadDestination) -> Result<HeaderMap, TransferFailure> {
    let mut headers = HeaderMap::new();
    for (name, value) in &destination.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransferFailure::Source(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransferFailure::Source(format!("invalid header value: {}", e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl TransferClient for HttpTransferClient {
    #[tracing::instrument(skip_all, fields(bytes = source.len()))]
    async fn put(
        &self,
        destination: &UploadDestination,
        source: &dyn ByteSource,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<(), TransferFailure> {
        if destination.is_expired() {
            return Err(TransferFailure::Expired);
        }

        let headers = destination_headers(destination)?;
        let body_stream = source.open().await?;

        let source_failed = Arc::new(AtomicBool::new(false));
        let failed = source_failed.clone();
        let mut sent: u64 = 0;
        let counted = body_stream.map(move |chunk| {
            match &chunk {
                Ok(bytes) => {
                    sent += bytes.len() as u64;
                    progress(sent);
                }
                Err(_) => failed.store(true, Ordering::Release),
            }
            chunk
        });

        let request = self
            .client
            .put(&destination.url)
            .headers(headers)
            .header(CONTENT_LENGTH, source.len())
            .body(reqwest::Body::wrap_stream(counted));

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferFailure::Cancelled),
            response = request.send() => response,
        }
        .map_err(|e| classify(e, source_failed.load(Ordering::Acquire)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransferFailure::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(status = status.as_u16(), "Transfer accepted by store");
        Ok(())
    }
}
