//! Artifact downloads.
//!
//! - Transport contract consumed by the controller (`transport`)
//! - Resumable HTTP transport (`http`)
//! - Progress event rate limiting (`progress`)
//! - Destination naming in the download directory (`naming`)

mod http;
mod naming;
mod progress;
mod transport;

pub use http::{HttpTransport, HttpTransportFactory};
pub use naming::{sequential_name, staging_path, unique_destination, STAGING_EXTENSION};
pub use progress::{percent, IntervalGate, ProgressThrottle};
pub use transport::{
    DownloadListener, DownloadRequest, DownloadTransport, ResponseHeaders, TransferProgress,
    TransportError, TransportFactory,
};
