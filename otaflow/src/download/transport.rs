//! Contract between the controller and a download transport.
//!
//! A transport owns one download session for one record. It runs on its own
//! worker and reports back through a [`DownloadListener`]; none of its entry
//! points block.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Errors produced by a download transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not be constructed.
    #[error("failed to create transport: {0}")]
    Build(String),

    /// The request failed before or while streaming the body.
    #[error("download from {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The server answered with an unusable status code.
    #[error("download from {url} failed with HTTP status {status}")]
    Status { url: String, status: u16 },

    /// The request timed out.
    #[error("download from {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// Writing the destination file failed.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The session was cancelled through [`DownloadTransport::cancel`].
    #[error("download cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether the failure is the result of a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// What a transport needs to fetch one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub download_id: String,
    pub url: String,
    pub destination: PathBuf,
}

/// Status line and headers of the response that started a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub status: u16,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHeaders {
    /// Look up a header, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `Content-Length`, if present and well formed.
    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
    }
}

/// One progress tick.
///
/// `bytes_read` and `content_length` cover the whole artifact, including
/// bytes a resumed session found on disk. `content_length` is `None` when the
/// server did not announce a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_read: u64,
    pub content_length: Option<u64>,
    /// Bytes per second.
    pub speed: u64,
    /// Estimated seconds remaining.
    pub eta: u64,
    pub done: bool,
}

/// Callbacks from a running transport. Called from the transport's worker.
pub trait DownloadListener: Send + Sync {
    fn on_headers(&self, response: &ResponseHeaders);

    fn on_progress(&self, progress: TransferProgress);

    fn on_success(&self, destination: &Path);

    /// Terminal failure. Cancellation is reported as [`TransportError::Cancelled`].
    fn on_failure(&self, error: &TransportError);
}

/// One download session.
pub trait DownloadTransport: Send + Sync {
    /// Download from scratch, truncating the destination.
    fn start(&self);

    /// Continue from the current length of the destination.
    fn resume(&self);

    /// Request the session to stop. Reported through `on_failure`.
    fn cancel(&self);
}

/// Builds transports for the controller.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        request: DownloadRequest,
        listener: Arc<dyn DownloadListener>,
    ) -> Result<Arc<dyn DownloadTransport>, TransportError>;
}
