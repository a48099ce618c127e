//! Destination file naming in the download directory.
//!
//! Every download gets its own file. When the artifact name is already taken
//! a sequence number is appended before the extension:
//! `update.zip`, `update-1.zip`, `update-2.zip`, ...

use std::path::{Path, PathBuf};

/// Suffix of staged copies produced by the legacy installer.
pub const STAGING_EXTENSION: &str = ".uncrypt";

/// Split a file name into stem and extension (with its leading dot).
///
/// A leading dot does not start an extension, so `.hidden` has none.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

/// Name of the `n`th alternative for `name`.
///
/// # Examples
///
/// ```
/// use otaflow::download::sequential_name;
///
/// assert_eq!(sequential_name("update.zip", 1), "update-1.zip");
/// assert_eq!(sequential_name("ota.v2.zip", 3), "ota.v2-3.zip");
/// assert_eq!(sequential_name("payload", 2), "payload-2");
/// ```
pub fn sequential_name(name: &str, n: u32) -> String {
    let (stem, ext) = split_name(name);
    format!("{stem}-{n}{ext}")
}

/// Pick a path for `name` in `dir` that does not exist yet.
///
/// Only the final component of `name` is used, so the result always lies
/// directly inside `dir`. Returns `None` when `name` has no file name
/// (empty, `.` or ending in `..`).
pub fn unique_destination(dir: &Path, name: &str) -> Option<PathBuf> {
    let name = Path::new(name).file_name()?.to_str()?;
    let candidate = dir.join(name);
    if !candidate.exists() {
        return Some(candidate);
    }

    let alternative = (1..=u32::MAX)
        .map(|n| dir.join(sequential_name(name, n)))
        .find(|path| !path.exists());
    Some(alternative.unwrap_or(candidate))
}

/// Path of the staged copy of `artifact`.
pub fn staging_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(STAGING_EXTENSION);
    PathBuf::from(name)
}
