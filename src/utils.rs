//! Utility functions for hdfsync
//!
//! This module provides the small filesystem helpers shared by the entry,
//! state and runner modules.
//!
//! ## Categories of Utilities
//!
//! ### File Operations
//! - Atomic file writing
//! - Permission widening for mirrored files
//! - Empty directory removal with expected-error classification
//!
//! ### Path Manipulation
//! - Converting absolute paths to relative, slash-separated keys
//! - Component-wise ancestry tests
//! - Device comparison for rename safety

use crate::error::{Result, SyncError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Outcome of trying to remove a directory that may not be empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveDir {
    /// Directory was removed
    Removed,
    /// Directory still has children and was left alone
    NotEmpty,
    /// Directory did not exist
    Missing,
}

/// Remove directory if empty
///
/// `NotFound` and "directory not empty" are expected outcomes and are
/// reported through [`RemoveDir`] rather than as errors.
pub fn remove_dir_if_empty(path: &Path) -> Result<RemoveDir> {
    match fs::read_dir(path) {
        Ok(mut children) => {
            if children.next().is_some() {
                return Ok(RemoveDir::NotEmpty);
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RemoveDir::Missing),
        Err(e) => return Err(SyncError::path_io(path, e)),
    }

    match fs::remove_dir(path) {
        Ok(()) => {
            trace!("Removed empty directory: {:?}", path);
            Ok(RemoveDir::Removed)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(RemoveDir::Missing),
        Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => Ok(RemoveDir::NotEmpty),
        Err(e) => Err(SyncError::path_io(path, e)),
    }
}

/// Remove a file, treating an already-missing file as success
///
/// Returns `true` when a file was actually removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SyncError::path_io(path, e)),
    }
}

/// Remove a directory tree, treating an already-missing tree as success
///
/// Returns `true` when something was actually removed.
pub fn remove_tree_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SyncError::path_io(path, e)),
    }
}

/// Create a directory and its parents, tolerating concurrent creation
pub fn ensure_dir(path: &Path) -> Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(SyncError::path_io(path, e)),
    }
}

/// Make a path relative to a base path, as a `/`-separated string
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::relative_key;
/// use std::path::Path;
///
/// let key = relative_key(Path::new("/m/data/sub/a.csv"), Path::new("/m/data")).unwrap();
/// assert_eq!(key, "sub/a.csv");
/// ```
pub fn relative_key(path: &Path, base: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).map_err(|_| {
        SyncError::internal(format!("Path {:?} is not relative to {:?}", path, base))
    })?;

    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Whether `a` is an ancestor of, descendant of, or equal to `b`
///
/// The test is per path component, so `/u/a.__x__` is unrelated to `/u/a`.
pub fn paths_related(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Whether two existing paths live on the same device
#[cfg(unix)]
pub fn same_device(a: &Path, b: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let da = fs::metadata(a).map_err(|e| SyncError::path_io(a, e))?.dev();
    let db = fs::metadata(b).map_err(|e| SyncError::path_io(b, e))?.dev();
    Ok(da == db)
}

/// Whether two existing paths live on the same device (Windows: same volume root)
#[cfg(not(unix))]
pub fn same_device(a: &Path, b: &Path) -> Result<bool> {
    let ra = a.canonicalize().map_err(|e| SyncError::path_io(a, e))?;
    let rb = b.canonicalize().map_err(|e| SyncError::path_io(b, e))?;
    Ok(ra.components().next() == rb.components().next())
}

/// Closest ancestor of `path` (or `path` itself) that exists
pub fn nearest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

/// Add group and other read permission to a file
#[cfg(unix)]
pub fn add_read_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)
        .map_err(|e| SyncError::path_io(path, e))?
        .permissions()
        .mode();
    fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o044))
        .map_err(|e| SyncError::path_io(path, e))
}

/// Add group and other read permission (no-op outside Unix)
#[cfg(not(unix))]
pub fn add_read_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Make a directory listable by group and other
#[cfg(unix)]
pub fn add_dir_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)
        .map_err(|e| SyncError::path_io(path, e))?
        .permissions()
        .mode();
    fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o055))
        .map_err(|e| SyncError::path_io(path, e))
}

#[cfg(not(unix))]
pub fn add_dir_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Format bytes in human-readable form
///
/// Uses binary units (1024-based).
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file is created next to the target so the final rename
/// never crosses a filesystem boundary. Readers observe either the previous
/// content or the complete new content.
///
/// # Atomicity Guarantees
///
/// - Either the entire file is written or the previous file is untouched
/// - The temporary file is removed if any step fails
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut temp = tempfile::Builder::new()
        .prefix(".hdfsync")
        .suffix(".tmp")
        .tempfile_in(&parent)
        .map_err(|e| SyncError::path_io(&parent, e))?;

    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    add_read_permissions(temp.path())?;

    temp.persist(path)
        .map_err(|e| SyncError::path_io(path, e.error))?;
    Ok(())
}
