//! Reconciliation runs
//!
//! [`Reconciler::run`] drives one run through its phases:
//!
//! ```text
//! Lock → LoadInputs → Diff → Fetch → MergeAndPurge → Persist → Check → Cleanup
//! ```
//!
//! Fetches are the only parallel phase. They run on a dedicated rayon pool
//! sized by the configured worker count, and every result is collected
//! before the index is touched. Any error escaping a phase before Persist
//! ends the run with the previously saved index left in place.

use crate::config::SyncConfig;
use crate::entry::SyncEntry;
use crate::error::{Result, SyncError};
use crate::index::LocalIndex;
use crate::lock::RunLock;
use crate::remote::{self, RemoteFs};
use crate::state::{self, AvailableSet, StateStore};
use crate::types::{FetchOutcome, RunReport};
use crate::utils;
use rayon::prelude::*;
use std::path::Path;
use std::time::{Instant, UNIX_EPOCH};
use tracing::{debug, error, info, instrument, warn};

/// Work derived from comparing the local index with the remote listing
#[derive(Debug, Default)]
pub struct Plan {
    /// New or changed entries, keyed by remote path
    pub fetch: Vec<(String, SyncEntry)>,
    /// Remote paths that disappeared from the listing
    pub purge: Vec<String>,
}

/// Compare the local index with the available set
///
/// An available entry is fetched when the index lacks it or holds an entry
/// that is not [`SyncEntry::equal`]. Indexed entries missing from the
/// listing are purged.
pub fn diff(local: &LocalIndex, available: &AvailableSet) -> Plan {
    let fetch = available
        .iter()
        .filter(|(key, entry)| local.get(key).map_or(true, |known| !known.equal(entry)))
        .map(|(key, entry)| (key.clone(), entry.clone()))
        .collect();
    let purge = local
        .iter()
        .filter(|(key, _)| !available.contains_key(*key))
        .map(|(key, _)| key.clone())
        .collect();
    Plan { fetch, purge }
}

/// Runs reconciliations for one configuration and remote
pub struct Reconciler {
    config: SyncConfig,
    client: Box<dyn RemoteFs>,
    remote_root: String,
    store: StateStore,
}

impl Reconciler {
    /// Connect to the remote named by the configuration
    pub fn new(config: SyncConfig) -> Result<Self> {
        let (client, remote_root) = remote::connect(&config.remote_url, &config.user, config.timeout)?;
        Ok(Self::with_remote(config, client, remote_root))
    }

    /// Use an already-connected remote rooted at `remote_root`
    pub fn with_remote(config: SyncConfig, client: Box<dyn RemoteFs>, remote_root: impl Into<String>) -> Self {
        let store = StateStore::new(config.index_path(), config.mirror_root(), config.unpack_root());
        Self {
            config,
            client,
            remote_root: remote_root.into(),
            store,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Perform one complete run
    ///
    /// Fatal conditions (lock held elsewhere, destination and temp on
    /// different filesystems, unreadable remote listing) return an error.
    /// Individual fetch, unpack, purge and check failures are logged and counted in
    /// the report; they do not stop the run.
    #[instrument(skip(self), fields(remote = %self.remote_root))]
    pub fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        let dry_run = self.config.dry_run;

        let _lock = RunLock::acquire(&self.config.lock)?;
        if dry_run {
            warn!("Dry run: no local changes will be made");
        }

        // LoadInputs
        self.prepare_roots()?;
        let includes = state::build_includes(&self.config.includes)?;
        let mut index = self.store.load_local();
        let available = self
            .store
            .load_available(self.client.as_ref(), &self.remote_root, &includes)?;
        let checks = self.store.load_check_table(self.config.conf_dir.as_deref());

        let mut report = RunReport {
            local: index.len(),
            available: available.len(),
            ..Default::default()
        };

        // Diff
        let plan = diff(&index, &available);
        info!(
            "{} entries to fetch, {} entries to purge",
            plan.fetch.len(),
            plan.purge.len()
        );

        // Fetch, then merge once every task has finished
        for (key, entry, result) in self.fetch_all(plan.fetch)? {
            match result {
                Ok(outcome) => {
                    if let FetchOutcome::UnpackFailed(_) = outcome {
                        report.unpack_failed += 1;
                    }
                    index.insert(key, entry);
                    report.fetched += 1;
                }
                Err(_) => report.fetch_failed += 1,
            }
        }

        for key in plan.purge {
            let Some(entry) = index.get(&key) else {
                continue;
            };
            match entry.purge(dry_run) {
                Ok(()) => {
                    index.remove(&key);
                    report.purged += 1;
                }
                Err(e) => {
                    error!("Failed to purge {}: {}", key, e);
                    report.purge_failed += 1;
                }
            }
        }

        // Persist
        let last_run = LocalIndex::last_saved(self.store.index_path()).unwrap_or(UNIX_EPOCH);
        if dry_run {
            info!("Dry run: index not saved");
        } else {
            index.write(self.store.index_path())?;
            report.persisted = true;
        }

        // Check
        for (key, entry) in index.iter() {
            let Some(commands) = checks.get(key) else {
                continue;
            };
            report.checked += 1;
            match entry.check(commands, last_run, dry_run) {
                Ok(outcome) if outcome.is_success() => debug!("Checked {}: {:?}", key, outcome),
                Ok(_) => report.check_failed += 1,
                Err(e) => {
                    error!("Failed to check manifest {}: {}", key, e);
                    report.check_failed += 1;
                }
            }
        }

        // Cleanup
        report.cleanup = self.store.cleanup(&index, dry_run);
        report.indexed = index.len();

        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        info!(
            "Run finished in {}: {} fetched, {} failed, {} not unpacked, {} purged, {} indexed",
            humantime::format_duration(elapsed),
            report.fetched,
            report.fetch_failed,
            report.unpack_failed,
            report.purged,
            report.indexed
        );
        Ok(report)
    }

    /// Make sure renames out of the temp directory stay on one filesystem,
    /// then create the destination roots
    fn prepare_roots(&self) -> Result<()> {
        let dest = &self.config.dest_dir;
        let temp = &self.config.temp_dir;

        check_same_filesystem(dest, temp)?;

        for dir in [dest.as_path(), temp.as_path(), self.store.mirror_root(), self.store.unpack_root()] {
            if self.config.dry_run {
                if !dir.is_dir() {
                    info!("Would create directory: {:?}", dir);
                }
            } else {
                utils::ensure_dir(dir)?;
            }
        }
        Ok(())
    }

    fn fetch_all(
        &self,
        pending: Vec<(String, SyncEntry)>,
    ) -> Result<Vec<(String, SyncEntry, Result<FetchOutcome>)>> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("fetch-{}", i))
            .build()
            .map_err(|e| SyncError::internal(format!("cannot start fetch workers: {}", e)))?;

        let client = self.client.as_ref();
        let temp_dir = self.config.temp_dir.as_path();
        let dry_run = self.config.dry_run;

        debug!("Fetching {} entries with {} workers", pending.len(), self.config.workers);
        let results = pool.install(|| {
            pending
                .into_par_iter()
                .map(|(key, entry)| {
                    let result = entry.fetch(client, temp_dir, dry_run);
                    if let Err(e) = &result {
                        error!("Failed to fetch {}: {}", key, e);
                    }
                    (key, entry, result)
                })
                .collect()
        });
        Ok(results)
    }
}

/// Fail with [`SyncError::CrossDevice`] when `dest` and `temp` resolve to
/// different filesystems
///
/// Paths that do not exist yet are judged by their nearest existing
/// ancestor, so nothing has to be created first.
fn check_same_filesystem(dest: &Path, temp: &Path) -> Result<()> {
    let (Some(dest_anchor), Some(temp_anchor)) = (utils::nearest_existing(dest), utils::nearest_existing(temp)) else {
        return Ok(());
    };
    if !utils::same_device(dest_anchor, temp_anchor)? {
        error!("Destination {:?} and temp {:?} are on different filesystems", dest, temp);
        return Err(SyncError::CrossDevice {
            dest: dest.to_path_buf(),
            temp: temp.to_path_buf(),
        });
    }
    Ok(())
}
