//! HTTP download transport with resume support.
//!
//! Each session runs on a dedicated thread using a blocking `reqwest` client.
//! Resumed sessions append to the destination with an HTTP `Range` request;
//! servers that ignore the range restart the file from scratch.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{
    DownloadListener, DownloadRequest, DownloadTransport, ResponseHeaders, TransferProgress,
    TransportError, TransportFactory,
};

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// Buffer size for reading/writing during downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Minimum spacing between progress ticks sent to the listener.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Creates [`HttpTransport`] sessions sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    client: Client,
    pub(crate) timeout: Duration,
}

impl HttpTransportFactory {
    /// Create a factory with the default timeout.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a factory with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        request: DownloadRequest,
        listener: Arc<dyn DownloadListener>,
    ) -> Result<Arc<dyn DownloadTransport>, TransportError> {
        if request.url.is_empty() {
            return Err(TransportError::Build(format!(
                "no download URL for {}",
                request.download_id
            )));
        }

        Ok(Arc::new(HttpTransport {
            session: Arc::new(Session {
                client: self.client.clone(),
                timeout: self.timeout,
                request,
                listener,
                cancel: CancellationToken::new(),
            }),
        }))
    }
}

/// One HTTP download session.
pub struct HttpTransport {
    session: Arc<Session>,
}

impl HttpTransport {
    fn spawn(&self, resume: bool) {
        let session = Arc::clone(&self.session);
        let name = format!("download-{}", session.request.download_id);
        let spawned = thread::Builder::new().name(name).spawn(move || session.run(resume));
        if let Err(e) = spawned {
            self.session.listener.on_failure(&TransportError::Request {
                url: self.session.request.url.clone(),
                reason: format!("failed to spawn download thread: {e}"),
            });
        }
    }
}

impl DownloadTransport for HttpTransport {
    fn start(&self) {
        self.spawn(false);
    }

    fn resume(&self) {
        self.spawn(true);
    }

    fn cancel(&self) {
        debug!(download_id = %self.session.request.download_id, "Cancelling download");
        self.session.cancel.cancel();
    }
}

struct Session {
    client: Client,
    timeout: Duration,
    request: DownloadRequest,
    listener: Arc<dyn DownloadListener>,
    cancel: CancellationToken,
}

impl Session {
    fn run(&self, resume: bool) {
        let dest = &self.request.destination;
        match self.download(resume) {
            Ok(total) => {
                info!(
                    download_id = %self.request.download_id,
                    bytes = total,
                    path = %dest.display(),
                    "Download complete"
                );
                self.listener.on_success(dest);
            }
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(download_id = %self.request.download_id, error = %e, "Download failed");
                }
                self.listener.on_failure(&e);
            }
        }
    }

    fn download(&self, resume: bool) -> Result<u64, TransportError> {
        let dest = &self.request.destination;
        let existing = if resume {
            dest.metadata().map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        let response = self.send(existing)?;
        let status = response.status();

        // A full response to a range request means the server ignored the range.
        let start_byte = if status == StatusCode::PARTIAL_CONTENT {
            existing
        } else {
            0
        };

        let headers = ResponseHeaders {
            status: status.as_u16(),
            url: response.url().to_string(),
            headers: response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect(),
        };
        let total_size = headers.content_length().map(|len| len + start_byte);
        self.listener.on_headers(&headers);

        let file = self.prepare_destination(dest, start_byte)?;
        self.stream(response, file, dest, start_byte, total_size)
    }

    fn send(&self, start_byte: u64) -> Result<Response, TransportError> {
        let url = &self.request.url;
        let mut request = self.client.get(url);
        if start_byte > 0 {
            debug!(url = %url, start_byte, "Resuming download with range request");
            request = request.header("Range", format!("bytes={}-", start_byte));
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: url.clone(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                TransportError::Request {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        if self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        // Check response status (200 OK or 206 Partial Content)
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    fn prepare_destination(&self, dest: &Path, start_byte: u64) -> Result<File, TransportError> {
        let write_err = |e| TransportError::Write {
            path: dest.to_path_buf(),
            source: e,
        };

        if start_byte > 0 {
            return OpenOptions::new().append(true).open(dest).map_err(write_err);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| TransportError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        File::create(dest).map_err(write_err)
    }

    fn stream(
        &self,
        mut response: Response,
        file: File,
        dest: &Path,
        start_byte: u64,
        total_size: Option<u64>,
    ) -> Result<u64, TransportError> {
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut downloaded = start_byte;
        let mut meter = SpeedMeter::new(start_byte);
        let mut last_tick: Option<Instant> = None;

        loop {
            if self.cancel.is_cancelled() {
                // Keep what was written so the session can be resumed.
                let _ = writer.flush();
                return Err(TransportError::Cancelled);
            }

            let bytes_read = response
                .read(&mut buffer)
                .map_err(|e| TransportError::Request {
                    url: self.request.url.clone(),
                    reason: format!("Read error: {}", e),
                })?;

            if bytes_read == 0 {
                break;
            }

            writer
                .write_all(&buffer[..bytes_read])
                .map_err(|e| TransportError::Write {
                    path: dest.to_path_buf(),
                    source: e,
                })?;

            downloaded += bytes_read as u64;

            let now = Instant::now();
            if last_tick.map_or(true, |t| now.duration_since(t) >= TICK_INTERVAL) {
                last_tick = Some(now);
                self.listener
                    .on_progress(meter.progress(downloaded, total_size, false));
            }
        }

        writer.flush().map_err(|e| TransportError::Write {
            path: dest.to_path_buf(),
            source: e,
        })?;

        self.listener
            .on_progress(meter.progress(downloaded, total_size, true));
        Ok(downloaded)
    }
}

/// Average transfer rate over the current session.
struct SpeedMeter {
    started: Instant,
    initial_bytes: u64,
}

impl SpeedMeter {
    fn new(initial_bytes: u64) -> Self {
        Self {
            started: Instant::now(),
            initial_bytes,
        }
    }

    fn progress(&self, bytes_read: u64, content_length: Option<u64>, done: bool) -> TransferProgress {
        let elapsed = self.started.elapsed().as_secs_f64();
        let session_bytes = bytes_read.saturating_sub(self.initial_bytes);
        let speed = if elapsed > 0.0 {
            (session_bytes as f64 / elapsed) as u64
        } else {
            0
        };
        let eta = match content_length {
            Some(total) if speed > 0 => total.saturating_sub(bytes_read) / speed,
            _ => 0,
        };

        TransferProgress {
            bytes_read,
            content_length,
            speed,
            eta,
            done,
        }
    }
}
