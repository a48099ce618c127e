//! Inspection of update package archives.
//!
//! Streaming packages carry a raw `payload.bin` that the update engine reads
//! in place, straight out of the zip file, so the engine needs the byte
//! offset of the entry's data rather than its contents.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

/// Entry holding the streaming payload.
pub const PAYLOAD_BIN: &str = "payload.bin";

/// Entry holding the payload's header lines.
pub const PAYLOAD_PROPERTIES: &str = "payload_properties.txt";

/// Problems with the layout or content of a package archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive could not be read.
    #[error("failed to read archive {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    /// The file is not a usable zip archive.
    #[error("malformed archive {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// A required entry is absent.
    #[error("entry {entry} not found in {}", path.display())]
    EntryNotFound { path: PathBuf, entry: String },
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>, ArchiveError> {
    let file = File::open(path).map_err(|e| ArchiveError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    ZipArchive::new(file).map_err(|e| zip_error(path, e))
}

fn zip_error(path: &Path, error: ZipError) -> ArchiveError {
    match error {
        ZipError::Io(source) => ArchiveError::Read {
            path: path.to_path_buf(),
            source,
        },
        other => ArchiveError::Malformed {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

fn entry_index(archive: &ZipArchive<File>, path: &Path, entry: &str) -> Result<usize, ArchiveError> {
    archive
        .index_for_name(entry)
        .ok_or_else(|| ArchiveError::EntryNotFound {
            path: path.to_path_buf(),
            entry: entry.to_string(),
        })
}

/// Byte offset of the data of `entry` within the archive at `path`.
pub fn payload_offset(path: &Path, entry: &str) -> Result<u64, ArchiveError> {
    let mut archive = open_archive(path)?;
    let index = entry_index(&archive, path, entry)?;
    // Raw access reads the local header without setting up decompression.
    let file = archive
        .by_index_raw(index)
        .map_err(|e| zip_error(path, e))?;
    let offset = file.data_start();
    debug!(entry, offset, "Located archive entry");
    Ok(offset)
}

/// Lines of the text entry `entry`, in order.
pub fn read_properties(path: &Path, entry: &str) -> Result<Vec<String>, ArchiveError> {
    let mut archive = open_archive(path)?;
    let index = entry_index(&archive, path, entry)?;
    let file = archive.by_index(index).map_err(|e| zip_error(path, e))?;

    BufReader::new(file)
        .lines()
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| ArchiveError::Read {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Whether the archive is a streaming (dual-partition) package.
pub fn is_streaming_package(path: &Path) -> Result<bool, ArchiveError> {
    let archive = open_archive(path)?;
    Ok(archive.index_for_name(PAYLOAD_BIN).is_some()
        && archive.index_for_name(PAYLOAD_PROPERTIES).is_some())
}
