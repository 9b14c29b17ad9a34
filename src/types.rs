//! Core data types used throughout hdfsync
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Remote state**: `RemoteObject` - one entry of a remote listing
//! - **Outcomes**: `FetchOutcome`, `CheckOutcome`, `CleanupStats`, `RunReport` -
//!   results of the individual reconciliation phases
//!
//! ## Examples
//!
//! ```rust
//! use hdfsync::types::RemoteObject;
//! use chrono::{TimeZone, Utc};
//!
//! let object = RemoteObject::file(
//!     "/data/sets/a.csv",
//!     10,
//!     Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
//! );
//! assert_eq!(object.name, "a.csv");
//! assert!(!object.is_dir);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of one object from a remote listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteObject {
    /// Base name of the object
    pub name: String,
    /// Full remote path
    pub full: String,
    /// Size in bytes
    pub size: u64,
    /// Remote modification timestamp
    pub modified: DateTime<Utc>,
    /// Whether this is a directory
    pub is_dir: bool,
}

impl RemoteObject {
    /// Build a file snapshot, deriving the base name from the full path
    pub fn file(full: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        let full = full.into();
        let name = base_name(&full).to_string();
        Self {
            name,
            full,
            size,
            modified,
            is_dir: false,
        }
    }

    /// Build a directory snapshot
    pub fn directory(full: impl Into<String>, modified: DateTime<Utc>) -> Self {
        let full = full.into();
        let name = base_name(&full).to_string();
        Self {
            name,
            full,
            size: 0,
            modified,
            is_dir: true,
        }
    }
}

fn base_name(full: &str) -> &str {
    full.trim_end_matches('/').rsplit('/').next().unwrap_or(full)
}

/// A manifest entry whose on-disk size disagrees with the recorded one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeMismatch {
    /// Manifest-relative path
    pub path: String,
    /// Size recorded in the manifest
    pub expected: u64,
    /// Size found on disk
    pub observed: u64,
}

/// Result of validating a dataset manifest and running its setup commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Manifest lists files that are not on disk; nothing was run
    MissingFiles(Vec<String>),
    /// Manifest sizes disagree with the files on disk; nothing was run
    SizeMismatch(Vec<SizeMismatch>),
    /// Nothing changed since the previous run; nothing was run
    Unchanged,
    /// Commands were executed (failures are counted, not retried)
    Executed {
        /// Number of commands attempted
        commands: usize,
        /// Number of commands that failed
        failed: usize,
    },
    /// Dry run: commands that would have been executed
    DryRun {
        /// Number of commands that would run
        commands: usize,
    },
}

impl CheckOutcome {
    /// Whether the manifest validated
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            CheckOutcome::MissingFiles(_) | CheckOutcome::SizeMismatch(_)
        )
    }
}

/// Result of a fetch that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Dry run: nothing was transferred
    DryRun,
    /// The mirror file was replaced (and unpacked, for archives)
    Fetched(u64),
    /// The mirror file was replaced but could not be unpacked
    UnpackFailed(u64),
}

/// Statistics from orphan cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Orphaned mirror files removed (or that would be removed on a dry run)
    pub files_removed: usize,
    /// Empty mirror directories removed
    pub dirs_removed: usize,
    /// Orphaned unpack directories removed (or that would be removed)
    pub unpacked_removed: usize,
}

impl CleanupStats {
    /// Check if cleanup touched anything
    pub fn has_changes(&self) -> bool {
        self.files_removed > 0 || self.dirs_removed > 0 || self.unpacked_removed > 0
    }
}

/// Summary of one reconciliation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Entries loaded from the local index
    pub local: usize,
    /// Entries in the filtered remote listing
    pub available: usize,
    /// Entries fetched successfully
    pub fetched: usize,
    /// Entries whose fetch failed
    pub fetch_failed: usize,
    /// Fetched archives that could not be unpacked
    pub unpack_failed: usize,
    /// Entries purged
    pub purged: usize,
    /// Entries whose purge failed
    pub purge_failed: usize,
    /// Manifests checked
    pub checked: usize,
    /// Manifests that failed validation
    pub check_failed: usize,
    /// Entries in the final index
    pub indexed: usize,
    /// Whether the index was written
    pub persisted: bool,
    /// Orphan cleanup statistics
    pub cleanup: CleanupStats,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl RunReport {
    /// Whether every fetch, unpack, purge and check in the run succeeded
    pub fn is_clean(&self) -> bool {
        self.fetch_failed == 0
            && self.unpack_failed == 0
            && self.purge_failed == 0
            && self.check_failed == 0
    }
}
