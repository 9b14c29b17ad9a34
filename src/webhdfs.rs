//! WebHDFS client
//!
//! Implements [`RemoteFs`] against the WebHDFS REST API of an HDFS name
//! node. Listings use `LISTSTATUS` and recurse client-side; reads use
//! `OPEN`, which redirects to a data node and is streamed straight into the
//! caller's sink.

use crate::error::{Result, SyncError};
use crate::remote::RemoteFs;
use crate::types::RemoteObject;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, trace};

/// WebHDFS API prefix
const API_PREFIX: &str = "/webhdfs/v1";

/// Blocking WebHDFS client
#[derive(Debug, Clone)]
pub struct WebHdfsClient {
    client: Client,
    base_url: String,
    user: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListStatusResponse {
    file_statuses: FileStatuses,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileStatuses {
    file_status: Vec<FileStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileStatus {
    path_suffix: String,
    #[serde(rename = "type")]
    kind: String,
    length: u64,
    modification_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RemoteExceptionResponse {
    remote_exception: RemoteException,
}

#[derive(Debug, Deserialize)]
struct RemoteException {
    exception: String,
    message: String,
}

impl WebHdfsClient {
    /// Create a client for the name node at `base_url` (scheme, host, port)
    pub fn new(base_url: impl Into<String>, user: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
        })
    }

    fn op_url(&self, path: &str, op: &str) -> String {
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
        format!(
            "{}{}{}?op={}&user.name={}",
            self.base_url, API_PREFIX, path, op, self.user
        )
    }

    fn send(&self, path: &str, op: &str) -> Result<Response> {
        let url = self.op_url(path, op);
        trace!("GET {}", url);
        let response = self.client.get(&url).send()?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().unwrap_or_default();
        let reason = match serde_json::from_str::<RemoteExceptionResponse>(&body) {
            Ok(e) => format!("{}: {}", e.remote_exception.exception, e.remote_exception.message),
            Err(_) => format!("HTTP {}", status),
        };
        Err(SyncError::remote(format!("{} {}: {}", op, path, reason)))
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<FileStatus>> {
        let listing: ListStatusResponse = self.send(dir, "LISTSTATUS")?.json()?;
        Ok(listing.file_statuses.file_status)
    }
}

fn to_timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

fn join_remote(dir: &str, name: &str) -> String {
    if name.is_empty() {
        dir.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

impl RemoteFs for WebHdfsClient {
    fn list(&self, root: &str, recursive: bool) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut pending = vec![root.to_string()];

        while let Some(dir) = pending.pop() {
            for status in self.list_dir(&dir)? {
                let full = join_remote(&dir, &status.path_suffix);
                let modified = to_timestamp(status.modification_time);
                if status.kind == "DIRECTORY" {
                    if recursive && !status.path_suffix.is_empty() {
                        pending.push(full.clone());
                    }
                    objects.push(RemoteObject::directory(full, modified));
                } else {
                    objects.push(RemoteObject::file(full, status.length, modified));
                }
            }
        }

        debug!("Listed {} remote objects under {}", objects.len(), root);
        Ok(objects)
    }

    fn get(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut response = self.send(path, "OPEN")?;
        Ok(response.copy_to(sink)?)
    }
}
