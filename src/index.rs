//! Persisted local index
//!
//! This module provides the `LocalIndex` struct which maps remote full paths
//! to the [`SyncEntry`] recorded by the last successful run. The index is
//! read once at start-up, mutated in memory and written back exactly once.
//!
//! On disk the index is a versioned JSON document:
//!
//! ```text
//! { "version": 1, "saved_at": "2024-01-01T00:00:00Z", "entries": { "/data/a.txt": { ... } } }
//! ```
//!
//! Writes go through a temporary file and a rename, so a crash never leaves
//! a truncated index behind.

use crate::entry::SyncEntry;
use crate::error::{Result, SyncError};
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info};

/// Current on-disk schema version
pub const INDEX_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: BTreeMap<String, SyncEntry>,
}

/// In-memory index keyed by remote full path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIndex {
    entries: BTreeMap<String, SyncEntry>,
}

impl LocalIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry recorded under `key`
    pub fn insert(&mut self, key: impl Into<String>, entry: SyncEntry) -> Option<SyncEntry> {
        self.entries.insert(key.into(), entry)
    }

    /// Look up an entry
    pub fn get(&self, key: &str) -> Option<&SyncEntry> {
        self.entries.get(key)
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &str) -> Option<SyncEntry> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(remote path, entry)` pairs in key order
    pub fn iter(&self) -> btree_map::Iter<'_, String, SyncEntry> {
        self.entries.iter()
    }

    /// Iterate over entries mutably, used when rebasing roots
    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, String, SyncEntry> {
        self.entries.iter_mut()
    }

    /// Keep only the entries for which `keep` returns true
    pub fn retain(&mut self, keep: impl FnMut(&String, &mut SyncEntry) -> bool) {
        self.entries.retain(keep);
    }

    /// Read an index document from disk
    ///
    /// A missing file surfaces as an I/O error with `NotFound`; callers
    /// decide whether that means "first run".
    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| SyncError::path_io(path, e))?;
        let document: IndexDocument = serde_json::from_slice(&data).map_err(|e| SyncError::InvalidIndex {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if document.version != INDEX_VERSION {
            return Err(SyncError::InvalidIndex {
                path: path.to_path_buf(),
                reason: format!(
                    "unsupported index version {} (expected {})",
                    document.version, INDEX_VERSION
                ),
            });
        }

        debug!(
            "Read index {:?} saved at {} with {} entries",
            path,
            document.saved_at,
            document.entries.len()
        );
        Ok(Self {
            entries: document.entries,
        })
    }

    /// Write the index atomically to `path`
    pub fn write(&self, path: &Path) -> Result<()> {
        let document = IndexDocument {
            version: INDEX_VERSION,
            saved_at: Utc::now(),
            entries: self.entries.clone(),
        };
        let data = serde_json::to_vec_pretty(&document)?;
        utils::atomic_write(path, &data)?;
        info!("Saved index with {} entries to {:?}", self.entries.len(), path);
        Ok(())
    }

    /// Modification time of the index file, if it exists
    pub fn last_saved(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}

impl<'a> IntoIterator for &'a LocalIndex {
    type Item = (&'a String, &'a SyncEntry);
    type IntoIter = btree_map::Iter<'a, String, SyncEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<(String, SyncEntry)> for LocalIndex {
    fn from_iter<I: IntoIterator<Item = (String, SyncEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
