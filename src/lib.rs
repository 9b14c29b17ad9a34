//! # hdfsync - Incremental HDFS subtree mirroring
//!
//! Mirrors a subtree of a remote HDFS cluster into a local directory,
//! fetching only objects that changed since the last run, unpacking
//! recognised archives and running per-dataset setup commands when a
//! dataset manifest shows new content.
//!
//! ## Overview
//!
//! Each run reconciles three inputs:
//! - the **local index** persisted by the previous run
//! - the **available set**, a fresh recursive listing of the remote root
//!   filtered by include globs
//! - the **check table**, built from dataset descriptor files
//!
//! New and changed objects are downloaded in parallel, objects that
//! disappeared remotely are purged locally, manifests are validated, the
//! index is saved and anything left on disk that the index does not
//! account for is removed.
//!
//! ## Layout on disk
//!
//! ```text
//! <dest>/
//! ├── .hdfsync.idx          persisted index
//! ├── mirror/               one file per remote object
//! │   └── sets/weather.tar.gz
//! └── unpack/               one directory per archive
//!     └── sets/weather/
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hdfsync::{Reconciler, SyncConfigBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfigBuilder::new("webhdfs://namenode:50070/data/sets", "/srv/datasets")
//!     .includes(vec!["**/*.tar.gz".to_string(), "**/manifest.json".to_string()])
//!     .conf_dir(Some("/etc/hdfsync".into()))
//!     .workers(8)
//!     .build()?;
//!
//! let report = Reconciler::new(config)?.run()?;
//! println!("fetched {} objects, purged {}", report.fetched, report.purged);
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - A mirror file only ever appears complete: downloads land in a
//!   temporary file that is renamed into place
//! - The index is written once per run, atomically, and only after the
//!   fetch and purge phases completed
//! - Failed transfers and failed setup commands are not retried within a
//!   run; the next run picks them up again
//! - Only one run per host holds the run lock at a time
//!
//! ## Module Organization
//!
//! - [`entry`]: per-object fetch, unpack, purge and manifest check
//! - [`state`]: index loading, remote listing, check table and cleanup
//! - [`runner`]: the run state machine and fetch worker pool
//! - [`remote`] / [`webhdfs`]: remote filesystem access
//! - [`config`], [`logging`], [`lock`]: process set-up
//! - [`types`], [`error`]: shared types and errors

pub mod archive;
pub mod config;
pub mod entry;
pub mod error;
pub mod formats;
pub mod index;
pub mod lock;
pub mod logging;
pub mod remote;
pub mod runner;
pub mod state;
pub mod types;
pub mod utils;
pub mod webhdfs;

pub use config::{SyncConfig, SyncConfigBuilder};
pub use entry::SyncEntry;
pub use error::{Result, SyncError, EXIT_ALREADY_RUNNING};
pub use index::LocalIndex;
pub use lock::{LockStrategy, RunLock};
pub use remote::{LocalRemote, RemoteFs};
pub use runner::Reconciler;
pub use state::StateStore;
pub use types::*;
