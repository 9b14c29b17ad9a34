//! Remote filesystem abstraction
//!
//! The reconciler only needs two operations from the remote side: a
//! recursive listing and a streaming read. [`RemoteFs`] captures that
//! contract; [`crate::webhdfs::WebHdfsClient`] talks to a real cluster and
//! [`LocalRemote`] serves a local directory tree through the same interface.
//!
//! Transport, authentication and per-request timeouts belong to the
//! implementations. Callers never retry; a failed call is logged and the
//! affected object is skipped until the next run.

use crate::error::{Result, SyncError};
use crate::types::RemoteObject;
use crate::webhdfs::WebHdfsClient;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;
use walkdir::WalkDir;

/// Read-only view of a remote filesystem
///
/// Implementations must be shareable across the fetch worker pool.
pub trait RemoteFs: Send + Sync {
    /// List `root`; with `recursive`, every descendant is returned as well.
    /// Directories are included in the listing.
    fn list(&self, root: &str, recursive: bool) -> Result<Vec<RemoteObject>>;

    /// Stream the object at `path` into `sink`, returning the byte count
    fn get(&self, path: &str, sink: &mut dyn Write) -> Result<u64>;
}

/// A local directory served as if it were a remote filesystem
///
/// Remote paths are the absolute local paths rendered with `/` separators.
#[derive(Debug, Clone, Default)]
pub struct LocalRemote;

impl LocalRemote {
    /// Create a new local remote
    pub fn new() -> Self {
        Self
    }

    fn snapshot(path: &Path, metadata: &std::fs::Metadata) -> Result<RemoteObject> {
        let full = path.to_string_lossy().replace('\\', "/");
        let modified: DateTime<Utc> = metadata.modified()?.into();
        Ok(if metadata.is_dir() {
            RemoteObject::directory(full, modified)
        } else {
            RemoteObject::file(full, metadata.len(), modified)
        })
    }
}

impl RemoteFs for LocalRemote {
    fn list(&self, root: &str, recursive: bool) -> Result<Vec<RemoteObject>> {
        let root_path = PathBuf::from(root);
        let walker = WalkDir::new(&root_path)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name();

        let mut objects = Vec::new();
        for entry in walker {
            let entry = entry?;
            let metadata = entry.metadata()?;
            trace!("Listed local object: {:?}", entry.path());
            objects.push(Self::snapshot(entry.path(), &metadata)?);
        }
        debug!("Listed {} local objects under {}", objects.len(), root);
        Ok(objects)
    }

    fn get(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut file = File::open(path).map_err(|e| SyncError::path_io(path, e))?;
        Ok(io::copy(&mut file, sink)?)
    }
}

/// Open the remote filesystem named by `url`
///
/// Returns the client together with the remote root path to mirror.
/// `http`, `https`, `webhdfs` and `swebhdfs` URLs talk WebHDFS; `file` URLs
/// serve a local directory.
pub fn connect(url: &str, user: &str, timeout: Duration) -> Result<(Box<dyn RemoteFs>, String)> {
    let parsed = Url::parse(url).map_err(|e| SyncError::config(format!("bad remote URL {}: {}", url, e)))?;
    let root = parsed.path().trim_end_matches('/').to_string();
    let root = if root.is_empty() { "/".to_string() } else { root };

    match parsed.scheme() {
        "file" => {
            let path = parsed
                .to_file_path()
                .map_err(|_| SyncError::config(format!("bad file URL: {}", url)))?;
            let root = path.to_string_lossy().trim_end_matches('/').to_string();
            Ok((Box::new(LocalRemote::new()), root))
        }
        scheme @ ("http" | "https" | "webhdfs" | "swebhdfs") => {
            let http = if matches!(scheme, "https" | "swebhdfs") { "https" } else { "http" };
            let host = parsed
                .host_str()
                .ok_or_else(|| SyncError::config(format!("remote URL has no host: {}", url)))?;
            let base = match parsed.port() {
                Some(port) => format!("{}://{}:{}", http, host, port),
                None => format!("{}://{}", http, host),
            };
            let client = WebHdfsClient::new(base, user, timeout)?;
            Ok((Box::new(client), root))
        }
        other => Err(SyncError::config(format!("unsupported remote scheme: {}", other))),
    }
}
