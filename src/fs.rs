use crate::deadline::CancelToken;
use crate::error::AppError;
use chrono::{DateTime, Local};
use log::{debug, warn};
use std::cmp::Ordering;
use std::fs::{self, Metadata};
use std::path::Path;
use std::time::SystemTime;

/// One row of a directory listing, read live from the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntryView {
    pub name: String,
    pub size_bytes: u64,
    pub modified_at: SystemTime,
    pub is_directory: bool,
    pub human_size: String,
    pub formatted_time: String,
}

impl DirectoryEntryView {
    pub fn from_metadata(name: String, metadata: &Metadata) -> Self {
        let is_directory = metadata.is_dir();
        let size_bytes = metadata.len();
        let modified_at = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let human_size = if is_directory {
            "-".to_string()
        } else {
            format_file_size(size_bytes)
        };

        DirectoryEntryView {
            name,
            size_bytes,
            modified_at,
            is_directory,
            human_size,
            formatted_time: format_timestamp(modified_at),
        }
    }
}

/// Reads the direct children of `dir`, skipping entries whose metadata
/// cannot be read, and returns them in listing order.
///
/// The token is checked between entries so a timed-out request stops
/// enumerating early.
pub fn read_entries(
    dir: &Path,
    cancel: &CancelToken,
) -> Result<Vec<DirectoryEntryView>, AppError> {
    debug!("Reading directory entries for: '{}'", dir.display());

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        if cancel.is_cancelled() {
            debug!("Directory read cancelled for: '{}'", dir.display());
            return Err(AppError::Timeout);
        }

        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        // Follows symlinks; dangling ones fail here and are skipped.
        match fs::metadata(entry.path()) {
            Ok(metadata) => entries.push(DirectoryEntryView::from_metadata(name, &metadata)),
            Err(e) => warn!("Failed to get info for '{}': {}", entry.path().display(), e),
        }
    }

    sort_entries(&mut entries);
    Ok(entries)
}

/// Directories first, then case-insensitive by name. Names that only differ
/// in case fall back to a byte comparison so the order never depends on
/// the order the OS returned them in.
pub fn sort_entries(entries: &mut [DirectoryEntryView]) {
    entries.sort_by(compare_entries);
}

fn compare_entries(a: &DirectoryEntryView, b: &DirectoryEntryView) -> Ordering {
    match (a.is_directory, b.is_directory) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
    }
}

/// Format file size in human-readable format
pub fn format_file_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    const THRESHOLD: f64 = 1024.0;

    if size < 1024 {
        return format!("{size} B");
    }

    let mut size_f = size as f64;
    let mut unit_index = 0;

    while size_f >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size_f /= THRESHOLD;
        unit_index += 1;
    }

    format!("{:.1} {}", size_f, UNITS[unit_index])
}

/// Formats a modification time in the server's local time zone.
pub fn format_timestamp(time: SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Heuristic: a directory whose device id differs from its parent's is the
/// root of a mounted filesystem.
#[cfg(unix)]
pub fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Some(parent) = path.parent() else {
        return true;
    };

    match (fs::metadata(path), fs::metadata(parent)) {
        (Ok(own), Ok(parent)) => own.dev() != parent.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn is_mount_point(_path: &Path) -> bool {
    false
}

/// Enumerates `root` to confirm the storage behind it still answers.
pub fn check_mount_health(root: &Path) -> Result<(), AppError> {
    fs::read_dir(root)
        .map(|_| ())
        .map_err(|e| AppError::StorageUnavailable(format!("mount point unhealthy: {e}")))
}
