//! Run configuration
//!
//! [`SyncConfig`] carries everything a run needs; it is normally assembled
//! by [`SyncConfigBuilder`], which fills in defaults and validates the
//! result. Derived locations (mirror root, unpack root, index file) are
//! computed from the destination directory on demand.

use crate::error::{Result, SyncError};
use crate::lock::LockStrategy;
use crate::state;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default mirror subdirectory name
pub const DEFAULT_SYNC_DIR: &str = "mirror";
/// Default unpack subdirectory name
pub const DEFAULT_ARCH_DIR: &str = "unpack";
/// Default index file name, stored in the destination directory
pub const DEFAULT_INDEX_NAME: &str = ".hdfsync.idx";
/// Default per-request remote timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// Validated configuration for one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote root URL
    pub remote_url: String,
    /// Local destination directory
    pub dest_dir: PathBuf,
    /// Include globs, relative to the remote root
    pub includes: Vec<String>,
    /// Directory for in-flight downloads and extractions
    pub temp_dir: PathBuf,
    /// Mirror subdirectory under `dest_dir`
    pub sync_dir: String,
    /// Unpack subdirectory under `dest_dir`
    pub arch_dir: String,
    /// Directory searched for dataset descriptors
    pub conf_dir: Option<PathBuf>,
    /// Single-instance lock
    pub lock: LockStrategy,
    /// Index file name under `dest_dir`
    pub index_name: String,
    /// Fetch worker count
    pub workers: usize,
    /// Log intended mutations without performing them
    pub dry_run: bool,
    /// Per-request remote timeout
    pub timeout: Duration,
    /// Remote user name
    pub user: String,
}

impl SyncConfig {
    /// Start building a configuration
    pub fn builder(remote_url: impl Into<String>, dest_dir: impl Into<PathBuf>) -> SyncConfigBuilder {
        SyncConfigBuilder::new(remote_url, dest_dir)
    }

    pub fn mirror_root(&self) -> PathBuf {
        self.dest_dir.join(&self.sync_dir)
    }

    pub fn unpack_root(&self) -> PathBuf {
        self.dest_dir.join(&self.arch_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.dest_dir.join(&self.index_name)
    }
}

/// Builder for [`SyncConfig`]
///
/// # Examples
///
/// ```rust
/// use hdfsync::config::SyncConfigBuilder;
///
/// let config = SyncConfigBuilder::new("webhdfs://namenode:50070/data", "/srv/data")
///     .includes(vec!["sets/*.csv".to_string()])
///     .workers(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.mirror_root(), std::path::Path::new("/srv/data/mirror"));
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfigBuilder {
    remote_url: String,
    dest_dir: PathBuf,
    includes: Vec<String>,
    temp_dir: Option<PathBuf>,
    sync_dir: String,
    arch_dir: String,
    conf_dir: Option<PathBuf>,
    lock: LockStrategy,
    index_name: String,
    workers: usize,
    dry_run: bool,
    timeout: Duration,
    user: Option<String>,
}

impl SyncConfigBuilder {
    /// Create a builder with default settings
    pub fn new(remote_url: impl Into<String>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            remote_url: remote_url.into(),
            dest_dir: dest_dir.into(),
            includes: Vec::new(),
            temp_dir: None,
            sync_dir: DEFAULT_SYNC_DIR.to_string(),
            arch_dir: DEFAULT_ARCH_DIR.to_string(),
            conf_dir: None,
            lock: LockStrategy::default(),
            index_name: DEFAULT_INDEX_NAME.to_string(),
            workers: num_cpus::get().max(1),
            dry_run: false,
            timeout: DEFAULT_TIMEOUT,
            user: None,
        }
    }

    /// Set include globs
    ///
    /// Duplicates are dropped; an empty list includes everything.
    pub fn includes(mut self, patterns: Vec<String>) -> Self {
        self.includes = patterns;
        self
    }

    /// Set the temporary directory; defaults to the system temp directory
    ///
    /// Must live on the same filesystem as the destination directory.
    pub fn temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(path.into());
        self
    }

    pub fn sync_dir(mut self, name: impl Into<String>) -> Self {
        self.sync_dir = name.into();
        self
    }

    pub fn arch_dir(mut self, name: impl Into<String>) -> Self {
        self.arch_dir = name.into();
        self
    }

    /// Set the dataset descriptor directory
    pub fn conf_dir(mut self, path: Option<PathBuf>) -> Self {
        self.conf_dir = path;
        self
    }

    /// Set the single-instance lock
    pub fn lock(mut self, lock: LockStrategy) -> Self {
        self.lock = lock;
        self
    }

    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = name.into();
        self
    }

    /// Set the number of fetch workers (minimum 1)
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count;
        self
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the remote user; defaults to `$USER`
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<SyncConfig> {
        if self.remote_url.trim().is_empty() {
            return Err(SyncError::config("remote URL must not be empty"));
        }
        if self.workers == 0 {
            return Err(SyncError::config("worker count must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(SyncError::config("timeout must be positive"));
        }
        for (what, name) in [
            ("sync dir", &self.sync_dir),
            ("arch dir", &self.arch_dir),
            ("index name", &self.index_name),
        ] {
            if name.is_empty() {
                return Err(SyncError::config(format!("{} must not be empty", what)));
            }
        }

        let mut includes: Vec<String> = Vec::new();
        for pattern in self.includes {
            if !includes.contains(&pattern) {
                includes.push(pattern);
            }
        }
        if includes.is_empty() {
            includes.push("*".to_string());
        }
        state::build_includes(&includes)?;

        let temp_dir = self.temp_dir.unwrap_or_else(env::temp_dir);
        let user = self
            .user
            .or_else(|| env::var("USER").ok())
            .or_else(|| env::var("USERNAME").ok())
            .unwrap_or_else(|| "hdfs".to_string());

        Ok(SyncConfig {
            remote_url: self.remote_url,
            dest_dir: absolute(&self.dest_dir)?,
            includes,
            temp_dir: absolute(&temp_dir)?,
            sync_dir: self.sync_dir,
            arch_dir: self.arch_dir,
            conf_dir: self.conf_dir,
            lock: self.lock,
            index_name: self.index_name,
            workers: self.workers,
            dry_run: self.dry_run,
            timeout: self.timeout,
            user,
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}
