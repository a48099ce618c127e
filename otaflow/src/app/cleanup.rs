//! Download directory housekeeping run at startup.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::download::STAGING_EXTENSION;
use crate::store::{Preferences, UpdateStore};

/// What a cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Leftover staged copies.
    pub staged_removed: usize,
    /// The last installed package, auto-deleted.
    pub installed_package_removed: bool,
    /// Files no stored update refers to.
    pub orphans_removed: usize,
}

/// Clean the download directory.
///
/// 1. Staged copies (`*.uncrypt`) are always removed.
/// 2. With auto-delete on, the last installed package is removed once the
///    build changed or the install was a reinstall.
/// 3. Once per state directory, files no stored update refers to are removed.
pub(crate) fn cleanup_download_dir(
    dir: &Path,
    prefs: &Preferences,
    store: &dyn UpdateStore,
    build_timestamp: i64,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    let Ok(files) = list_files(dir) else {
        warn!(dir = %dir.display(), "Failed to access download directory");
        return report;
    };

    for file in files.iter().filter(|f| is_staged(f)) {
        if remove(file) {
            report.staged_removed += 1;
        }
    }

    let book = prefs.install_bookkeeping();
    let build_changed = book.old_timestamp.unwrap_or(0) != build_timestamp;
    if (build_changed || book.install_again) && prefs.auto_delete_updates() {
        if let Some(package) = book.package_path.filter(|p| p.exists()) {
            info!(path = %package.display(), "Deleting installed update");
            report.installed_package_removed = remove(&package);
            // Keep a re-download of the same name from being deleted.
            if let Err(e) = prefs.clear_install_package_path() {
                warn!(error = %e, "Could not clear installed package path");
            }
        }
    }

    if prefs.cleanup_done() {
        return report;
    }

    debug!(dir = %dir.display(), "Removing unreferenced downloads");
    let known: HashSet<PathBuf> = match store.load_all() {
        Ok(records) => records
            .into_iter()
            .filter_map(|r| r.local_file)
            .map(|p| absolute(&p))
            .collect(),
        Err(e) => {
            warn!(error = %e, "Could not load stored updates, skipping cleanup");
            return report;
        }
    };

    for file in list_files(dir).unwrap_or_default() {
        if !known.contains(&absolute(&file)) && remove(&file) {
            report.orphans_removed += 1;
        }
    }

    if let Err(e) = prefs.set_cleanup_done() {
        warn!(error = %e, "Could not record cleanup");
    }
    report
}

fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn is_staged(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(STAGING_EXTENSION))
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn remove(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Deleted");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not delete");
            false
        }
    }
}
