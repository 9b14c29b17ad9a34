//! Integration tests for hdfsync
//!
//! Runs complete reconciliations against a local directory standing in for
//! the remote cluster, covering first fetches, incremental runs, remote
//! deletions, transfer failures, relocation and dataset hooks.

use ::hdfsync::*;
use filetime::FileTime;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::info;

/// A remote directory, a local destination and the settings tying them
pub struct SyncHarness {
    pub remote_dir: TempDir,
    pub work_dir: TempDir,
    pub sync_dir: String,
    pub conf_dir: Option<PathBuf>,
    pub includes: Vec<String>,
    pub dry_run: bool,
}

impl SyncHarness {
    pub fn new() -> Self {
        Self {
            remote_dir: TempDir::new().unwrap(),
            work_dir: TempDir::new().unwrap(),
            sync_dir: "mirror".to_string(),
            conf_dir: None,
            includes: Vec::new(),
            dry_run: false,
        }
    }

    pub fn remote_root(&self) -> String {
        self.remote_dir.path().to_string_lossy().to_string()
    }

    /// Remote full path of a relative name
    pub fn remote_key(&self, relative: &str) -> String {
        format!("{}/{}", self.remote_root(), relative)
    }

    pub fn dest(&self) -> PathBuf {
        self.work_dir.path().join("dest")
    }

    pub fn mirror(&self) -> PathBuf {
        self.dest().join(&self.sync_dir)
    }

    pub fn unpack(&self) -> PathBuf {
        self.dest().join("unpack")
    }

    pub fn index_path(&self) -> PathBuf {
        self.dest().join(".hdfsync.idx")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.work_dir.path().join("run.lock")
    }

    /// Create a remote file with a fixed modification time
    pub fn put(&self, relative: &str, content: &[u8], mtime: i64) -> PathBuf {
        let path = self.remote_dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
        path
    }

    pub fn delete(&self, relative: &str) {
        fs::remove_file(self.remote_dir.path().join(relative)).unwrap();
    }

    pub fn config(&self) -> SyncConfig {
        SyncConfigBuilder::new("file:///unused", self.dest())
            .temp_dir(self.work_dir.path().join("tmp"))
            .sync_dir(self.sync_dir.clone())
            .conf_dir(self.conf_dir.clone())
            .includes(self.includes.clone())
            .lock(LockStrategy::File(self.lock_path()))
            .workers(4)
            .dry_run(self.dry_run)
            .build()
            .unwrap()
    }

    pub fn run(&self) -> Result<RunReport> {
        self.run_with(Box::new(LocalRemote::new()))
    }

    pub fn run_with(&self, remote: Box<dyn RemoteFs>) -> Result<RunReport> {
        let report = Reconciler::with_remote(self.config(), remote, self.remote_root()).run()?;
        info!("Run report: {:?}", report);
        Ok(report)
    }

    pub fn index(&self) -> LocalIndex {
        LocalIndex::read(&self.index_path()).unwrap()
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves a local directory but breaks transfers of selected paths
/// after a few bytes
pub struct FlakyRemote {
    inner: LocalRemote,
    broken: Vec<String>,
}

impl FlakyRemote {
    pub fn new(broken: Vec<String>) -> Self {
        Self {
            inner: LocalRemote::new(),
            broken,
        }
    }
}

impl RemoteFs for FlakyRemote {
    fn list(&self, root: &str, recursive: bool) -> Result<Vec<RemoteObject>> {
        self.inner.list(root, recursive)
    }

    fn get(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        if self.broken.iter().any(|b| path.ends_with(b.as_str())) {
            sink.write_all(b"partial")?;
            return Err(SyncError::remote(format!("connection reset while reading {}", path)));
        }
        self.inner.get(path, sink)
    }
}

/// A remote whose listing always fails
pub struct UnreachableRemote;

impl RemoteFs for UnreachableRemote {
    fn list(&self, _root: &str, _recursive: bool) -> Result<Vec<RemoteObject>> {
        Err(SyncError::remote("listing down"))
    }

    fn get(&self, path: &str, _sink: &mut dyn Write) -> Result<u64> {
        Err(SyncError::remote(format!("cannot read {}", path)))
    }
}

pub fn tar_available() -> bool {
    Command::new("tar").arg("--version").output().is_ok()
}

/// Build a gzip tarball at `archive` containing `files`
pub fn make_tarball(archive: &Path, files: &[(&str, &str)]) {
    let staging = TempDir::new().unwrap();
    for (name, content) in files {
        let path = staging.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    fs::create_dir_all(archive.parent().unwrap()).unwrap();
    let mut cmd = Command::new("tar");
    cmd.arg("-czf").arg(archive).arg("-C").arg(staging.path());
    for (name, _) in files {
        cmd.arg(name);
    }
    assert!(cmd.status().unwrap().success());
}

/// Write an executable hook that creates `marker` and ignores its arguments
#[cfg(unix)]
pub fn hook_script(dir: &Path, marker: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let script = dir.join("hook.sh");
    fs::write(&script, format!("#!/bin/sh\ntouch '{}'\n", marker.display())).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn mtime_secs(path: &Path) -> i64 {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap()).unix_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_first_run_records_entry() {
        let harness = SyncHarness::new();
        harness.put("a.txt", b"0123456789", 1_600_000_000);

        let report = harness.run().unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.indexed, 1);
        assert!(report.is_clean());

        let index = harness.index();
        assert_eq!(index.len(), 1);
        let entry = index.get(&harness.remote_key("a.txt")).unwrap();
        assert_eq!(entry.remote.size, 10);
        assert_eq!(entry.remote.modified.timestamp(), 1_600_000_000);

        let mirrored = harness.mirror().join("a.txt");
        assert_eq!(fs::read(&mirrored).unwrap(), b"0123456789");
        assert_eq!(mtime_secs(&mirrored), 1_600_000_000);
    }

    #[test]
    #[traced_test]
    fn test_unchanged_objects_are_not_refetched() {
        let harness = SyncHarness::new();
        harness.put("a.txt", b"aaa", 1_000);
        harness.put("sub/b.txt", b"bbb", 1_000);
        harness.run().unwrap();

        let report = harness.run().unwrap();
        assert_eq!(report.local, 2);
        assert_eq!(report.fetched, 0);
        assert!(!report.cleanup.has_changes());

        harness.put("a.txt", b"changed", 2_000);
        let report = harness.run().unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(fs::read(harness.mirror().join("a.txt")).unwrap(), b"changed");
    }

    #[test]
    fn test_locally_deleted_file_is_refetched() {
        let harness = SyncHarness::new();
        harness.put("a.txt", b"aaa", 1_000);
        harness.run().unwrap();

        fs::remove_file(harness.mirror().join("a.txt")).unwrap();
        let report = harness.run().unwrap();
        assert_eq!(report.local, 0);
        assert_eq!(report.fetched, 1);
        assert!(harness.mirror().join("a.txt").exists());
    }

    #[test]
    #[traced_test]
    fn test_removed_archive_is_purged() {
        if !tar_available() {
            return;
        }
        let harness = SyncHarness::new();
        let archive = harness.remote_dir.path().join("sets/2024/b.tar.gz");
        make_tarball(&archive, &[("data/part-0.csv", "x,y\n")]);
        harness.put("keep.txt", b"keep", 1_000);

        let report = harness.run().unwrap();
        assert_eq!(report.fetched, 2);
        let unpacked = harness.unpack().join("sets/2024/b");
        assert_eq!(
            fs::read_to_string(unpacked.join("data/part-0.csv")).unwrap(),
            "x,y\n"
        );

        harness.delete("sets/2024/b.tar.gz");
        let report = harness.run().unwrap();
        assert_eq!(report.purged, 1);

        assert!(!harness.mirror().join("sets").exists());
        assert!(!harness.unpack().join("sets").exists());
        assert!(harness.mirror().exists());
        assert!(harness.unpack().exists());
        assert!(harness.mirror().join("keep.txt").exists());
        assert!(!harness.index().contains(&harness.remote_key("sets/2024/b.tar.gz")));
    }

    #[test]
    #[traced_test]
    fn test_broken_archive_is_fetched_once() {
        let harness = SyncHarness::new();
        harness.put("broken.tgz", b"not really a tarball", 1_000);

        let report = harness.run().unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.unpack_failed, 1);
        assert!(!report.is_clean());
        assert!(harness.index().contains(&harness.remote_key("broken.tgz")));

        for _ in 0..2 {
            let report = harness.run().unwrap();
            assert_eq!(report.local, 1);
            assert_eq!(report.fetched, 0);
            assert_eq!(report.unpack_failed, 0);
            assert!(report.is_clean());
        }
        assert!(harness.mirror().join("broken.tgz").exists());
        assert!(!harness.unpack().join("broken").exists());
    }

    #[test]
    fn test_failed_listing_leaves_previous_state() {
        let harness = SyncHarness::new();
        harness.put("a.txt", b"aaa", 1_000);
        harness.run().unwrap();

        let index_before = fs::read(harness.index_path()).unwrap();
        let mirrored = harness.mirror().join("a.txt");
        let mtime_before = mtime_secs(&mirrored);

        harness.put("a.txt", b"changed", 2_000);
        harness.put("b.txt", b"bbb", 2_000);
        let err = harness.run_with(Box::new(UnreachableRemote)).unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));

        assert_eq!(fs::read(harness.index_path()).unwrap(), index_before);
        assert_eq!(fs::read(&mirrored).unwrap(), b"aaa");
        assert_eq!(mtime_secs(&mirrored), mtime_before);
        assert!(!harness.mirror().join("b.txt").exists());
    }

    #[test]
    #[traced_test]
    fn test_failed_transfer_leaves_no_partial_file() {
        let harness = SyncHarness::new();
        harness.put("good.txt", b"good", 1_000);
        harness.put("bad.txt", b"complete content", 1_000);

        let flaky = FlakyRemote::new(vec!["bad.txt".to_string()]);
        let report = harness.run_with(Box::new(flaky)).unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.fetch_failed, 1);
        assert!(!report.is_clean());

        assert!(!harness.mirror().join("bad.txt").exists());
        assert!(!harness.index().contains(&harness.remote_key("bad.txt")));
        assert_eq!(fs::read_dir(harness.work_dir.path().join("tmp")).unwrap().count(), 0);

        // The next healthy run picks it up
        let report = harness.run().unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(
            fs::read(harness.mirror().join("bad.txt")).unwrap(),
            b"complete content"
        );
    }

    #[test]
    fn test_failed_refetch_keeps_previous_copy() {
        let harness = SyncHarness::new();
        harness.put("a.txt", b"version one", 1_000);
        harness.run().unwrap();

        harness.put("a.txt", b"version two", 2_000);
        let flaky = FlakyRemote::new(vec!["a.txt".to_string()]);
        let report = harness.run_with(Box::new(flaky)).unwrap();
        assert_eq!(report.fetch_failed, 1);

        assert_eq!(fs::read(harness.mirror().join("a.txt")).unwrap(), b"version one");
        let index = harness.index();
        assert_eq!(
            index.get(&harness.remote_key("a.txt")).unwrap().remote.modified.timestamp(),
            1_000
        );
    }

    #[test]
    fn test_include_globs() {
        let mut harness = SyncHarness::new();
        harness.includes = vec!["data/*.csv".to_string()];
        harness.put("data/a.csv", b"a", 1_000);
        harness.put("logs/a.csv", b"l", 1_000);
        harness.put("data/in_flight.csv._COPYING_", b"p", 1_000);

        let report = harness.run().unwrap();
        assert_eq!(report.available, 1);
        assert!(harness.mirror().join("data/a.csv").exists());
        assert!(!harness.mirror().join("logs").exists());
    }

    #[test]
    fn test_relocated_mirror_is_not_refetched() {
        let mut harness = SyncHarness::new();
        harness.put("a.txt", b"aaa", 1_000);
        harness.run().unwrap();

        fs::rename(harness.mirror(), harness.dest().join("moved")).unwrap();
        harness.sync_dir = "moved".to_string();

        let report = harness.run().unwrap();
        assert_eq!(report.local, 1);
        assert_eq!(report.fetched, 0);
        let entry = harness.index().get(&harness.remote_key("a.txt")).cloned().unwrap();
        assert_eq!(entry.mirror, harness.dest().join("moved"));
    }

    #[test]
    fn test_corrupt_index_means_full_fetch() {
        let harness = SyncHarness::new();
        harness.put("a.txt", b"aaa", 1_000);
        fs::create_dir_all(harness.dest()).unwrap();
        fs::write(harness.index_path(), b"not an index").unwrap();

        let report = harness.run().unwrap();
        assert_eq!(report.local, 0);
        assert_eq!(report.fetched, 1);
        assert_eq!(harness.index().len(), 1);
    }

    #[test]
    fn test_orphans_are_cleaned_up() {
        let harness = SyncHarness::new();
        harness.put("a.txt", b"aaa", 1_000);
        harness.run().unwrap();

        fs::create_dir_all(harness.mirror().join("stray/deeper")).unwrap();
        fs::write(harness.mirror().join("stray/deeper/x.bin"), b"x").unwrap();
        fs::create_dir_all(harness.unpack().join("leftover/inner")).unwrap();

        let report = harness.run().unwrap();
        assert_eq!(report.cleanup.files_removed, 1);
        assert_eq!(report.cleanup.unpacked_removed, 1);
        assert!(!harness.mirror().join("stray").exists());
        assert!(!harness.unpack().join("leftover").exists());
        assert!(harness.index_path().exists());

        let report = harness.run().unwrap();
        assert!(!report.cleanup.has_changes());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let mut harness = SyncHarness::new();
        harness.put("a.txt", b"aaa", 1_000);
        harness.dry_run = true;

        let report = harness.run().unwrap();
        assert_eq!(report.fetched, 1);
        assert!(!report.persisted);
        assert!(!harness.mirror().join("a.txt").exists());
        assert!(!harness.index_path().exists());
    }

    #[test]
    fn test_held_lock_stops_the_run() {
        let harness = SyncHarness::new();
        harness.put("a.txt", b"aaa", 1_000);

        let _held = RunLock::acquire(&LockStrategy::File(harness.lock_path())).unwrap();
        let err = harness.run().unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning(_)));
        assert_eq!(err.exit_code(), EXIT_ALREADY_RUNNING);
        assert!(!harness.mirror().exists());
    }

    #[cfg(unix)]
    #[test]
    #[traced_test]
    fn test_dataset_commands_run_once_per_change() {
        let mut harness = SyncHarness::new();
        harness.put("sets/weather/part-0.csv", b"abc", 1_000);
        harness.put(
            "sets/weather/manifest.json",
            br#"{"files": {"part-0.csv": {"size": 3}}}"#,
            1_000,
        );

        let conf = harness.work_dir.path().join("conf");
        fs::create_dir_all(&conf).unwrap();
        let marker = harness.work_dir.path().join("weather.ready");
        let hook = hook_script(harness.work_dir.path(), &marker);
        fs::write(
            conf.join("weather_dataset.yaml"),
            format!(
                "hdfs_path: {}\nsetup_cmd:\n  - {}\n",
                harness.remote_key("sets/weather/manifest.json"),
                hook.display()
            ),
        )
        .unwrap();
        harness.conf_dir = Some(conf);

        // Fetched files carry old remote timestamps, but there is no prior
        // index so everything counts as new
        let report = harness.run().unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.check_failed, 0);
        assert!(marker.exists());

        fs::remove_file(&marker).unwrap();
        let report = harness.run().unwrap();
        assert_eq!(report.checked, 1);
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_incomplete_dataset_runs_nothing() {
        let mut harness = SyncHarness::new();
        harness.put(
            "sets/weather/manifest.json",
            br#"{"files": {"part-0.csv": {"size": 3}}}"#,
            1_000,
        );

        let conf = harness.work_dir.path().join("conf");
        fs::create_dir_all(&conf).unwrap();
        let marker = harness.work_dir.path().join("weather.ready");
        let hook = hook_script(harness.work_dir.path(), &marker);
        fs::write(
            conf.join("weather_dataset.yml"),
            format!(
                "hdfs_path: {}\nsetup_cmd: {}\n",
                harness.remote_key("sets/weather/manifest.json"),
                hook.display()
            ),
        )
        .unwrap();
        harness.conf_dir = Some(conf);

        let report = harness.run().unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.check_failed, 1);
        assert!(!marker.exists());
    }
}
