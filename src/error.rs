//! Error types for hdfsync
//!
//! This module defines the error type shared by every component of the
//! mirror. Errors are grouped along the lines the reconciler cares about:
//! fatal start-up conditions abort a run before anything is mutated, while
//! everything else is reported against a single entry and the run carries on.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the hdfsync library
pub type Result<T> = std::result::Result<T, SyncError>;

/// Exit status used when another run already holds the instance lock
pub const EXIT_ALREADY_RUNNING: i32 = 3;

/// Main error type for all hdfsync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error tied to a specific path
    #[error("IO error on {path:?}: {source}")]
    PathIo {
        /// Path the operation was acting on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during YAML deserialization
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Include glob failed to compile
    #[error("Invalid include pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote filesystem reported an error
    #[error("Remote error: {0}")]
    Remote(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Persisted index could not be used
    #[error("Invalid index {path:?}: {reason}")]
    InvalidIndex {
        /// Index file location
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Dataset descriptor is malformed or incomplete
    #[error("Invalid dataset descriptor {path:?}: {reason}")]
    InvalidDescriptor {
        /// Descriptor file location
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Manifest could not be parsed
    #[error("Invalid manifest {path:?}: {reason}")]
    InvalidManifest {
        /// Manifest file location
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Archive extraction failed
    #[error("Extraction of {path:?} failed: {reason}")]
    Extraction {
        /// Archive being extracted
        path: PathBuf,
        /// Failure detail
        reason: String,
    },

    /// External command exited unsuccessfully
    #[error("Command `{command}` failed: {reason}")]
    Command {
        /// Command line that was run
        command: String,
        /// Failure detail
        reason: String,
    },

    /// Another run holds the instance lock
    #[error("Another hdfsync run is already active ({0})")]
    AlreadyRunning(String),

    /// Lock could not be acquired for a reason other than contention
    #[error("Lock error: {0}")]
    Lock(String),

    /// Destination and temp directories live on different filesystems
    #[error("Destination {dest:?} and temp directory {temp:?} are on different devices")]
    CrossDevice {
        /// Destination directory
        dest: PathBuf,
        /// Temporary directory
        temp: PathBuf,
    },

    /// Logger destination could not be set up
    #[error("Logging error: {0}")]
    Logging(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Attach a path to an I/O error
    pub fn path_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::PathIo {
            path: path.into(),
            source,
        }
    }

    /// Create a remote error with a custom message
    pub fn remote(msg: impl Into<String>) -> Self {
        SyncError::Remote(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        SyncError::InvalidConfiguration(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SyncError::Internal(msg.into())
    }

    /// Whether this error belongs to the start-up class that halts a run
    /// before any mutation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::AlreadyRunning(_)
                | SyncError::Lock(_)
                | SyncError::CrossDevice { .. }
                | SyncError::InvalidConfiguration(_)
        )
    }

    /// Whether the underlying I/O error means the target was already gone
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::Io(e) | SyncError::PathIo { source: e, .. } => {
                e.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::AlreadyRunning(_) => EXIT_ALREADY_RUNNING,
            _ => 1,
        }
    }
}
