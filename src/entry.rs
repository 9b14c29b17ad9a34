//! Per-object reconciliation state
//!
//! A [`SyncEntry`] ties one remote object to its place in the local mirror
//! and, for archives, to its extracted tree under the unpack root. All
//! paths are derived from the remote path and the roots in effect, so an
//! entry can be relocated by rewriting its roots without touching disk.
//!
//! ## Life of an entry
//!
//! ```text
//! listing ──► equal()? ──no──► fetch() ──► unzip()
//!                 │yes                         │
//!                 ▼                            ▼
//!              (skip)          index ◄── success
//!
//! gone from listing ──► purge() ──► index entry dropped
//! manifest entry    ──► check() ──► setup commands
//! ```
//!
//! Fetches run on worker threads. Each one touches only its own temporary
//! file and its own mirror path, so entries never contend with each other.

use crate::archive::ArchiveKind;
use crate::error::{Result, SyncError};
use crate::formats::Manifest;
use crate::remote::RemoteFs;
use crate::types::{CheckOutcome, FetchOutcome, RemoteObject, SizeMismatch};
use crate::utils::{self, RemoveDir};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// One tracked remote object and the local roots it maps onto
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncEntry {
    /// Snapshot of the remote object
    pub remote: RemoteObject,
    /// Remote root the object was listed under
    pub source: String,
    /// Local mirror root
    pub mirror: PathBuf,
    /// Local unpack root
    pub unpack: PathBuf,
}

impl SyncEntry {
    /// Create an entry for `remote` listed under `source`
    pub fn new(
        remote: RemoteObject,
        source: impl Into<String>,
        mirror: impl Into<PathBuf>,
        unpack: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote,
            source: source.into(),
            mirror: mirror.into(),
            unpack: unpack.into(),
        }
    }

    /// Remote path relative to the remote root, without a leading slash
    pub fn relative(&self) -> &str {
        self.remote
            .full
            .strip_prefix(self.source.as_str())
            .unwrap_or(&self.remote.full)
            .trim_start_matches('/')
    }

    /// Local path of the mirrored file
    pub fn mirror_path(&self) -> PathBuf {
        self.mirror.join(self.relative())
    }

    /// Archive suffix and kind, if the object is a recognised archive
    pub fn archive(&self) -> Option<(&'static str, ArchiveKind)> {
        ArchiveKind::detect(self.relative())
    }

    /// Directory the archive is extracted into: the mirror-relative path
    /// under the unpack root with the archive suffix stripped
    pub fn unpack_path(&self) -> Option<PathBuf> {
        let (suffix, _) = self.archive()?;
        let relative = self.relative();
        Some(self.unpack.join(&relative[..relative.len() - suffix.len()]))
    }

    /// Whether no fetch is needed: remote size and timestamp both match
    pub fn equal(&self, other: &SyncEntry) -> bool {
        self.remote.size == other.remote.size && self.remote.modified == other.remote.modified
    }

    /// Whether the local copy was lost or tampered with since it was recorded
    ///
    /// True when the mirror file is missing or its modification time is
    /// older than the recorded remote timestamp. Timestamps are compared at
    /// millisecond precision, or at whole seconds when the local filesystem
    /// kept no sub-second part.
    pub fn is_modified(&self) -> bool {
        let metadata = match fs::metadata(self.mirror_path()) {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return true,
        };

        let local = FileTime::from_last_modification_time(&metadata);
        let remote = self.remote.modified;
        if local.nanoseconds() == 0 {
            local.unix_seconds() < remote.timestamp()
        } else {
            let local_ms = local.unix_seconds() * 1_000 + i64::from(local.nanoseconds() / 1_000_000);
            local_ms < remote.timestamp_millis()
        }
    }

    /// Point the entry at new local roots; returns whether anything changed
    pub fn rebase(&mut self, mirror: &Path, unpack: &Path) -> bool {
        let mut changed = false;
        if self.mirror != mirror {
            warn!("Detected mirror directory move from {:?} to {:?}", self.mirror, mirror);
            self.mirror = mirror.to_path_buf();
            changed = true;
        }
        if self.unpack != unpack {
            warn!("Detected unpack directory move from {:?} to {:?}", self.unpack, unpack);
            self.unpack = unpack.to_path_buf();
            changed = true;
        }
        changed
    }

    /// Download the object into the mirror
    ///
    /// The content is streamed into a temporary file under `temp_dir`, given
    /// group/other read permission and the remote timestamp, then renamed
    /// over the mirror path. The rename is the only point at which the new
    /// content becomes visible. Archives are extracted afterwards; an
    /// extraction failure is logged and reported as
    /// [`FetchOutcome::UnpackFailed`], since the mirror file itself is good.
    ///
    /// On failure the temporary file is removed and the mirror path is left
    /// as it was.
    pub fn fetch(&self, client: &dyn RemoteFs, temp_dir: &Path, dry_run: bool) -> Result<FetchOutcome> {
        if dry_run {
            info!("Fetching remote file: {}", self.remote.full);
            return Ok(FetchOutcome::DryRun);
        }

        let target = self.mirror_path();
        let mut temp = tempfile::Builder::new()
            .prefix(".hdfsync-")
            .tempfile_in(temp_dir)
            .map_err(|e| SyncError::path_io(temp_dir, e))?;
        debug!("Created temp file: {:?}", temp.path());

        let bytes = client.get(&self.remote.full, temp.as_file_mut())?;
        temp.as_file().sync_all()?;
        if bytes != self.remote.size {
            warn!(
                "Fetched {} bytes for {} but listing reported {}",
                bytes, self.remote.full, self.remote.size
            );
        }

        if let Some(parent) = target.parent() {
            utils::ensure_dir(parent)?;
        }
        utils::add_read_permissions(temp.path())?;

        let stamp = FileTime::from_unix_time(
            self.remote.modified.timestamp(),
            self.remote.modified.timestamp_subsec_nanos(),
        );
        filetime::set_file_times(temp.path(), stamp, stamp)
            .map_err(|e| SyncError::path_io(temp.path(), e))?;

        let temp_path = temp.path().to_path_buf();
        temp.persist(&target)
            .map_err(|e| SyncError::path_io(&target, e.error))?;
        debug!("Renamed temp file from {:?} to {:?}", temp_path, target);
        info!(
            "Fetched remote file: {} ({})",
            self.remote.full,
            utils::format_bytes(bytes)
        );

        if let Err(e) = self.unzip(temp_dir) {
            error!("Failed to unpack {:?}: {}", target, e);
            return Ok(FetchOutcome::UnpackFailed(bytes));
        }
        Ok(FetchOutcome::Fetched(bytes))
    }

    /// Extract the mirrored archive into its unpack directory
    ///
    /// Extraction happens in a fresh directory under `temp_dir`, which is
    /// then swapped in: an existing unpack directory is renamed aside, the
    /// new tree is renamed into place and the aside copy is removed. The
    /// swap is not atomic as a whole; leftover aside directories from an
    /// interrupted swap are removed before the next one starts.
    pub fn unzip(&self, temp_dir: &Path) -> Result<()> {
        let (target, kind) = match (self.unpack_path(), self.archive()) {
            (Some(target), Some((_, kind))) => (target, kind),
            _ => return Ok(()),
        };
        let archive = self.mirror_path();

        self.remove_stale_asides(&target)?;

        let staging = tempfile::Builder::new()
            .prefix(".hdfsync-unpack-")
            .tempdir_in(temp_dir)
            .map_err(|e| SyncError::path_io(temp_dir, e))?;
        debug!("Created temporary unpack path: {:?}", staging.path());

        kind.extract(&archive, staging.path())?;
        debug!("Unpacked {:?} into {:?}", archive, staging.path());
        utils::add_dir_permissions(staging.path())?;

        let tag = staging
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "swap".to_string());
        let aside = aside_path(&target, &tag);

        if let Some(parent) = target.parent() {
            utils::ensure_dir(parent)?;
        }

        let moved_aside = match fs::rename(&target, &aside) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(SyncError::path_io(&target, e)),
        };

        if let Err(e) = fs::rename(staging.path(), &target) {
            if moved_aside {
                if let Err(restore) = fs::rename(&aside, &target) {
                    error!("Failed to restore {:?} from {:?}: {}", target, aside, restore);
                }
            }
            return Err(SyncError::path_io(&target, e));
        }

        if moved_aside {
            utils::remove_tree_if_exists(&aside)?;
        }
        info!("Moved unpacked path {:?} to {:?}", staging.path(), target);
        Ok(())
    }

    fn remove_stale_asides(&self, target: &Path) -> Result<()> {
        let (parent, name) = match (target.parent(), target.file_name()) {
            (Some(parent), Some(name)) => (parent, name.to_string_lossy().into_owned()),
            _ => return Ok(()),
        };
        let prefix = format!("{}.__", name);

        let children = match fs::read_dir(parent) {
            Ok(children) => children,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SyncError::path_io(parent, e)),
        };
        for child in children {
            let child = child?;
            let child_name = child.file_name().to_string_lossy().into_owned();
            if child_name.starts_with(&prefix) && child_name.ends_with("__") {
                warn!("Removing stale unpack swap directory: {:?}", child.path());
                utils::remove_tree_if_exists(&child.path())?;
            }
        }
        Ok(())
    }

    /// Remove the mirrored file and its unpack directory
    ///
    /// Parent directories left empty are removed up to, but excluding, the
    /// mirror and unpack roots. Already-missing paths count as removed.
    pub fn purge(&self, dry_run: bool) -> Result<()> {
        let mirror_path = self.mirror_path();
        if dry_run {
            info!("Purging local file: {:?}", mirror_path);
            return Ok(());
        }

        if let Some(unpacked) = self.unpack_path() {
            if utils::remove_tree_if_exists(&unpacked)? {
                info!("Purged local unpacked directory: {:?}", unpacked);
            }
            prune_empty_parents(&unpacked, &self.unpack)?;
        }

        if utils::remove_file_if_exists(&mirror_path)? {
            info!("Purged local file: {:?}", mirror_path);
        }
        prune_empty_parents(&mirror_path, &self.mirror)?;
        Ok(())
    }

    /// Validate the dataset manifest held by this entry and run its setup
    /// commands when anything changed since `last_run`
    ///
    /// Every manifest file must be present next to the manifest with the
    /// recorded size, otherwise nothing runs. Each command is a program path,
    /// run in order from the manifest's directory with the manifest path as
    /// its only argument; a failing
    /// command is logged and the next one still runs. Failed commands are
    /// not retried.
    pub fn check(&self, commands: &[String], last_run: SystemTime, dry_run: bool) -> Result<CheckOutcome> {
        let manifest_path = self.mirror_path();
        let manifest = Manifest::load(&manifest_path)?;
        info!(
            "Processing {} items from manifest: {:?}",
            manifest.files.len(),
            manifest_path
        );

        let base = manifest_path
            .parent()
            .ok_or_else(|| SyncError::internal(format!("manifest {:?} has no parent", manifest_path)))?;

        let mut observed: BTreeMap<String, fs::Metadata> = BTreeMap::new();
        for item in WalkDir::new(base).min_depth(1) {
            let item = item?;
            if !item.file_type().is_file() || item.path() == manifest_path {
                continue;
            }
            let key = utils::relative_key(item.path(), base)?;
            if manifest.files.contains_key(&key) {
                observed.insert(key, item.metadata()?);
            } else {
                warn!("  File not found in manifest, skipping: {:?}", item.path());
            }
        }

        let missing: Vec<String> = manifest
            .files
            .keys()
            .filter(|name| !observed.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!("  Manifest is missing {} file(s), aborting:", missing.len());
            for name in &missing {
                warn!("    {}", name);
            }
            return Ok(CheckOutcome::MissingFiles(missing));
        }

        let mismatched: Vec<SizeMismatch> = manifest
            .files
            .iter()
            .filter_map(|(name, expected)| {
                let found = observed.get(name)?.len();
                (found != expected.size).then(|| SizeMismatch {
                    path: name.clone(),
                    expected: expected.size,
                    observed: found,
                })
            })
            .collect();
        if !mismatched.is_empty() {
            warn!("  Manifest has {} invalid file(s), aborting:", mismatched.len());
            for m in &mismatched {
                warn!(
                    "    {} (expected: {} bytes, observed: {} bytes)",
                    m.path, m.expected, m.observed
                );
            }
            return Ok(CheckOutcome::SizeMismatch(mismatched));
        }

        let newer = observed
            .values()
            .filter_map(|m| m.modified().ok())
            .any(|mtime| mtime > last_run);
        let manifest_mtime = fs::metadata(&manifest_path)
            .and_then(|m| m.modified())
            .map_err(|e| SyncError::path_io(&manifest_path, e))?;
        if !newer && manifest_mtime < last_run {
            info!("  Manifest has no updates, skipping");
            return Ok(CheckOutcome::Unchanged);
        }

        if dry_run {
            for command in commands {
                info!("  Would execute dataset manifest command: {} {:?}", command, manifest_path);
            }
            return Ok(CheckOutcome::DryRun {
                commands: commands.len(),
            });
        }

        let mut failed = 0;
        for command in commands {
            match run_command(command, &manifest_path, base) {
                Ok(()) => info!("  Executed dataset manifest command: {} {:?}", command, manifest_path),
                Err(e) => {
                    // TODO: record failed commands so the next run can retry them
                    error!("  {}", e);
                    failed += 1;
                }
            }
        }
        Ok(CheckOutcome::Executed {
            commands: commands.len(),
            failed,
        })
    }
}

fn aside_path(target: &Path, tag: &str) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(format!(".__{}__", tag));
    PathBuf::from(name)
}

/// Climb from `path` towards `root`, removing directories that are empty
fn prune_empty_parents(path: &Path, root: &Path) -> Result<()> {
    if !path.starts_with(root) {
        error!("Request to purge untracked path: {:?}", path);
        return Ok(());
    }

    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        match utils::remove_dir_if_empty(dir)? {
            RemoveDir::Removed => info!("Purged local empty directory: {:?}", dir),
            RemoveDir::Missing => {}
            RemoveDir::NotEmpty => break,
        }
        current = dir.parent();
    }
    Ok(())
}

fn run_command(command: &str, manifest: &Path, cwd: &Path) -> Result<()> {
    if command.trim().is_empty() {
        return Err(SyncError::Command {
            command: command.to_string(),
            reason: "empty command".to_string(),
        });
    }

    let status = Command::new(command)
        .arg(manifest)
        .current_dir(cwd)
        .status()
        .map_err(|e| SyncError::Command {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(SyncError::Command {
            command: command.to_string(),
            reason: format!("exited with {}", status),
        })
    }
}
