//! Reconciliation inputs and orphan cleanup
//!
//! [`StateStore`] builds the three inputs of a run (the persisted local
//! index, the filtered remote listing and the check table) and removes
//! local artifacts that the final index no longer accounts for.

use crate::entry::SyncEntry;
use crate::error::Result;
use crate::formats::{self, DatasetDescriptor};
use crate::index::LocalIndex;
use crate::remote::RemoteFs;
use crate::types::CleanupStats;
use crate::utils::{self, RemoveDir};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

/// Name ending of objects still being written on the remote side
pub const IN_PROGRESS_MARKER: &str = "_COPYING_";

/// Fresh listing: remote full path to entry
pub type AvailableSet = BTreeMap<String, SyncEntry>;

/// Dataset manifest remote path to ordered setup commands
pub type CheckTable = BTreeMap<String, Vec<String>>;

/// Compile include patterns into a matcher
///
/// Patterns match the path relative to the remote root; `*` crosses `/`
/// so the default `*` retains everything.
pub fn build_includes<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    if patterns.is_empty() {
        builder.add(GlobBuilder::new("*").literal_separator(false).build()?);
    }
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern.as_ref()).literal_separator(false).build()?);
    }
    Ok(builder.build()?)
}

/// Loads reconciliation inputs and cleans up orphans under fixed roots
#[derive(Debug, Clone)]
pub struct StateStore {
    index_path: PathBuf,
    mirror_root: PathBuf,
    unpack_root: PathBuf,
}

impl StateStore {
    pub fn new(
        index_path: impl Into<PathBuf>,
        mirror_root: impl Into<PathBuf>,
        unpack_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            index_path: index_path.into(),
            mirror_root: mirror_root.into(),
            unpack_root: unpack_root.into(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    pub fn unpack_root(&self) -> &Path {
        &self.unpack_root
    }

    /// Load the persisted index
    ///
    /// A missing or unreadable index yields an empty one, which makes the
    /// run a full fetch. Entries recorded under other roots are rebased onto
    /// the current ones; entries whose local copy was lost or altered are
    /// dropped so they get fetched again.
    pub fn load_local(&self) -> LocalIndex {
        let mut index = match LocalIndex::read(&self.index_path) {
            Ok(index) => {
                info!("Loaded {} entries from index {:?}", index.len(), self.index_path);
                index
            }
            Err(e) if e.is_not_found() => {
                info!("No index at {:?}, performing full fetch", self.index_path);
                return LocalIndex::new();
            }
            Err(e) => {
                error!("Failed to load index, performing full fetch: {}", e);
                return LocalIndex::new();
            }
        };

        let mut rebased = 0;
        for (_, entry) in index.iter_mut() {
            if entry.rebase(&self.mirror_root, &self.unpack_root) {
                rebased += 1;
            }
        }
        if rebased > 0 {
            info!("Rebased {} index entries onto new roots", rebased);
        }

        index.retain(|key, entry| {
            let modified = entry.is_modified();
            if modified {
                warn!("Local copy of {} is missing or modified, dropping from index", key);
            }
            !modified
        });
        index
    }

    /// List the remote root and keep the files matching `includes`
    ///
    /// Directories and in-progress transfers are skipped. A failed listing
    /// is an error; a malformed individual object is logged and skipped.
    pub fn load_available(
        &self,
        client: &dyn RemoteFs,
        remote_root: &str,
        includes: &GlobSet,
    ) -> Result<AvailableSet> {
        let mut available = AvailableSet::new();
        let root = remote_root.trim_end_matches('/');

        for object in client.list(remote_root, true)? {
            if object.is_dir || object.name.ends_with(IN_PROGRESS_MARKER) {
                trace!("Skipping remote object: {}", object.full);
                continue;
            }

            let relative = match object.full.strip_prefix(root) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
                _ => {
                    warn!("Remote object {} is outside {}, skipping", object.full, remote_root);
                    continue;
                }
            };

            if !includes.is_match(relative) {
                debug!("Remote object {} not included, skipping", object.full);
                continue;
            }

            let key = object.full.clone();
            available.insert(
                key,
                SyncEntry::new(object, root, &self.mirror_root, &self.unpack_root),
            );
        }

        info!("Found {} available remote files under {}", available.len(), remote_root);
        Ok(available)
    }

    /// Collect setup commands from dataset descriptors under `conf_dir`
    ///
    /// Malformed descriptors are logged and skipped one by one.
    pub fn load_check_table(&self, conf_dir: Option<&Path>) -> CheckTable {
        let mut table = CheckTable::new();
        let Some(conf_dir) = conf_dir else {
            return table;
        };

        for item in WalkDir::new(conf_dir).follow_links(true).sort_by_file_name() {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    warn!("Failed to read dataset config directory: {}", e);
                    continue;
                }
            };
            if !item.file_type().is_file() || !formats::is_descriptor_name(&item.file_name().to_string_lossy()) {
                continue;
            }

            match DatasetDescriptor::load(item.path()) {
                Ok(descriptor) => {
                    debug!(
                        "Loaded dataset descriptor {:?} for {}",
                        item.path(),
                        descriptor.hdfs_path
                    );
                    if table.insert(descriptor.hdfs_path.clone(), descriptor.setup_cmd).is_some() {
                        warn!("Duplicate dataset descriptor for {}, using {:?}", descriptor.hdfs_path, item.path());
                    }
                }
                Err(e) => warn!("Skipping dataset descriptor: {}", e),
            }
        }

        info!("Loaded {} dataset descriptors", table.len());
        table
    }

    /// Remove local files and unpack directories not accounted for by `index`
    ///
    /// Mirror files not tracked by the index are deleted, then directories
    /// left empty. Unpack directories unrelated to every tracked unpack path
    /// are removed recursively; related ones are kept and only descended
    /// into when they are strict ancestors of a tracked path. The index file
    /// is never removed. Running cleanup twice changes nothing the second
    /// time.
    pub fn cleanup(&self, index: &LocalIndex, dry_run: bool) -> CleanupStats {
        let mut stats = CleanupStats::default();
        self.cleanup_mirror(index, dry_run, &mut stats);
        self.cleanup_unpack(index, dry_run, &mut stats);

        if stats.has_changes() {
            info!(
                "Cleanup removed {} files, {} empty directories, {} unpacked directories",
                stats.files_removed, stats.dirs_removed, stats.unpacked_removed
            );
        }
        stats
    }

    fn cleanup_mirror(&self, index: &LocalIndex, dry_run: bool, stats: &mut CleanupStats) {
        if !self.mirror_root.is_dir() {
            return;
        }
        let tracked: HashSet<PathBuf> = index.iter().map(|(_, e)| e.mirror_path()).collect();

        for item in WalkDir::new(&self.mirror_root).min_depth(1).contents_first(true) {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    warn!("Failed to walk mirror directory: {}", e);
                    continue;
                }
            };
            let path = item.path();

            if item.file_type().is_dir() {
                if dry_run {
                    continue;
                }
                match utils::remove_dir_if_empty(path) {
                    Ok(RemoveDir::Removed) => {
                        info!("Removed empty directory: {:?}", path);
                        stats.dirs_removed += 1;
                    }
                    Ok(_) => {}
                    Err(e) => error!("Failed to remove directory: {}", e),
                }
                continue;
            }

            if path == self.index_path || tracked.contains(path) {
                continue;
            }
            if dry_run {
                info!("Would remove orphaned file: {:?}", path);
                stats.files_removed += 1;
                continue;
            }
            match utils::remove_file_if_exists(path) {
                Ok(_) => {
                    info!("Removed orphaned file: {:?}", path);
                    stats.files_removed += 1;
                }
                Err(e) => error!("Failed to remove orphaned file: {}", e),
            }
        }
    }

    fn cleanup_unpack(&self, index: &LocalIndex, dry_run: bool, stats: &mut CleanupStats) {
        if !self.unpack_root.is_dir() {
            return;
        }
        let tracked: Vec<PathBuf> = index.iter().filter_map(|(_, e)| e.unpack_path()).collect();

        let mut walker = WalkDir::new(&self.unpack_root).min_depth(1).into_iter();
        while let Some(item) = walker.next() {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    warn!("Failed to walk unpack directory: {}", e);
                    continue;
                }
            };
            if !item.file_type().is_dir() {
                continue;
            }
            let path = item.path().to_path_buf();

            if tracked.iter().any(|t| path.starts_with(t)) {
                walker.skip_current_dir();
                continue;
            }
            if tracked.iter().any(|t| utils::paths_related(&path, t)) {
                continue;
            }

            walker.skip_current_dir();
            if dry_run {
                info!("Would remove orphaned unpacked directory: {:?}", path);
                stats.unpacked_removed += 1;
                continue;
            }
            match utils::remove_tree_if_exists(&path) {
                Ok(_) => {
                    info!("Removed orphaned unpacked directory: {:?}", path);
                    stats.unpacked_removed += 1;
                }
                Err(e) => error!("Failed to remove unpacked directory: {}", e),
            }
        }
    }
}
