//! Cancellable copy of an artifact to its staging path.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use tokio_util::sync::CancellationToken;

use super::error::StagingError;
use crate::download::percent;

/// Buffer size for the copy (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Copy `src` to `dst`, reporting the integer percentage after every chunk.
///
/// Cancellation is checked between chunks. A partial copy is left in place
/// for the caller to remove.
pub(crate) fn copy_with_progress(
    src: &Path,
    dst: &Path,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(u8),
) -> Result<(), StagingError> {
    let read_err = |e| StagingError::Io {
        path: src.to_path_buf(),
        source: e,
    };
    let write_err = |e| StagingError::Io {
        path: dst.to_path_buf(),
        source: e,
    };

    let mut input = File::open(src).map_err(read_err)?;
    let total = input.metadata().map_err(read_err)?.len();
    let mut output = BufWriter::new(File::create(dst).map_err(write_err)?);

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(StagingError::Cancelled);
        }

        let n = input.read(&mut buffer).map_err(read_err)?;
        if n == 0 {
            break;
        }
        output.write_all(&buffer[..n]).map_err(write_err)?;

        copied += n as u64;
        on_progress(percent(copied, total));
    }

    output.flush().map_err(write_err)?;
    Ok(())
}
