//! Single-instance run lock
//!
//! A run holds a [`RunLock`] for its whole lifetime; dropping it (or the
//! process exiting) releases it. Two strategies are available: binding a
//! loopback TCP port, which needs no filesystem state, or an exclusive
//! advisory lock on a file. Either way the lock is host-local and advisory.

use crate::error::{Result, SyncError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Default loopback port used as the run lock
pub const DEFAULT_LOCK_PORT: u16 = 2311;

/// How a run asserts that it is the only one on this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    /// Bind `127.0.0.1:<port>`
    Port(u16),
    /// Hold an exclusive lock on a file
    File(PathBuf),
}

impl Default for LockStrategy {
    fn default() -> Self {
        LockStrategy::Port(DEFAULT_LOCK_PORT)
    }
}

impl std::fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockStrategy::Port(port) => write!(f, "port {}", port),
            LockStrategy::File(path) => write!(f, "lock file {}", path.display()),
        }
    }
}

#[derive(Debug)]
enum Guard {
    Port(TcpListener),
    File(File),
}

/// A held run lock, released on drop
#[derive(Debug)]
pub struct RunLock {
    strategy: LockStrategy,
    _guard: Guard,
}

impl RunLock {
    /// Try to take the lock without blocking
    ///
    /// Fails with [`SyncError::AlreadyRunning`] when another process holds
    /// it and with [`SyncError::Lock`] for any other failure.
    pub fn acquire(strategy: &LockStrategy) -> Result<Self> {
        let guard = match strategy {
            LockStrategy::Port(port) => Guard::Port(bind_port(*port)?),
            LockStrategy::File(path) => Guard::File(lock_file(path)?),
        };
        debug!("Acquired run lock on {}", strategy);
        Ok(Self {
            strategy: strategy.clone(),
            _guard: guard,
        })
    }

    pub fn strategy(&self) -> &LockStrategy {
        &self.strategy
    }
}

fn bind_port(port: u16) -> Result<TcpListener> {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).map_err(|e| {
        if e.kind() == ErrorKind::AddrInUse {
            SyncError::AlreadyRunning(format!("port {} is already bound", port))
        } else {
            error!("Failed to bind lock port {}: {}", port, e);
            SyncError::Lock(format!("cannot bind port {}: {}", port, e))
        }
    })
}

fn lock_file(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| SyncError::Lock(format!("cannot open {}: {}", path.display(), e)))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(SyncError::AlreadyRunning(
            format!("{} is locked", path.display()),
        )),
        Err(e) => Err(SyncError::Lock(format!("cannot lock {}: {}", path.display(), e))),
    }
}
