//! # hdfsync CLI - mirror an HDFS subtree locally
//!
//! ## Usage
//! ```bash
//! # Mirror /data/sets into /srv/datasets
//! hdfsync -u webhdfs://namenode:50070/data/sets -d /srv/datasets
//!
//! # Only CSV files and manifests, with dataset hooks, 8 workers
//! hdfsync -u webhdfs://namenode:50070/data/sets -d /srv/datasets \
//!     -i '**/*.csv' -i '**/manifest.json' -c /etc/hdfsync -w 8
//!
//! # Show what would change
//! hdfsync -u webhdfs://namenode:50070/data/sets -d /srv/datasets --dry-run
//! ```
//!
//! Exit status is 0 on success, 3 when another run holds the lock and 1 for
//! any other failure.

use clap::Parser;
use colored::*;
use hdfsync::logging::{self, LogSpec};
use hdfsync::{LockStrategy, Reconciler, Result, SyncConfigBuilder};
use std::path::PathBuf;
use std::time::Duration;

/// Mirror a remote HDFS subtree into a local directory
#[derive(Parser)]
#[command(name = "hdfsync")]
#[command(version)]
#[command(about = "Mirror a remote HDFS subtree into a local directory")]
#[command(long_about = None)]
struct Cli {
    /// Remote root URL (webhdfs://, http://, https:// or file://)
    #[arg(short = 'u', long)]
    hdfs_url: String,

    /// Local destination directory
    #[arg(short = 'd', long)]
    dest_dir: PathBuf,

    /// Include globs relative to the remote root (repeatable)
    #[arg(short = 'i', long, num_args = 1..)]
    includes: Vec<String>,

    /// Temporary directory, on the same filesystem as the destination
    #[arg(short = 't', long)]
    temp_dir: Option<PathBuf>,

    /// Mirror subdirectory name
    #[arg(short = 's', long, default_value = hdfsync::config::DEFAULT_SYNC_DIR)]
    sync_dir: String,

    /// Unpack subdirectory name
    #[arg(short = 'e', long, default_value = hdfsync::config::DEFAULT_ARCH_DIR)]
    arch_dir: String,

    /// Dataset descriptor directory
    #[arg(short = 'c', long)]
    conf_dir: Option<PathBuf>,

    /// Loopback port used as the run lock
    #[arg(short = 'p', long, default_value_t = hdfsync::lock::DEFAULT_LOCK_PORT)]
    run_port: u16,

    /// Use an exclusive lock on this file instead of the run port
    #[arg(long, conflicts_with = "run_port")]
    lock_file: Option<PathBuf>,

    /// Logger destination URL
    #[arg(short = 'l', long, default_value = "console://")]
    log_conf: String,

    /// Index file name under the destination directory
    #[arg(short = 'm', long, default_value = hdfsync::config::DEFAULT_INDEX_NAME)]
    manifest: String,

    /// Number of fetch workers (defaults to the CPU count)
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Log what would change without changing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Per-request remote timeout in seconds
    #[arg(short = 'o', long, default_value_t = 4)]
    timeout: u64,

    /// Remote user name (defaults to $USER)
    #[arg(long)]
    user: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    let spec = match LogSpec::parse(&cli.log_conf) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    };
    if let Err(e) = logging::init(&spec) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli) {
        tracing::error!("{}", e);
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    let lock = match cli.lock_file {
        Some(path) => LockStrategy::File(path),
        None => LockStrategy::Port(cli.run_port),
    };

    let mut builder = SyncConfigBuilder::new(cli.hdfs_url, cli.dest_dir)
        .includes(cli.includes)
        .sync_dir(cli.sync_dir)
        .arch_dir(cli.arch_dir)
        .conf_dir(cli.conf_dir)
        .lock(lock)
        .index_name(cli.manifest)
        .dry_run(cli.dry_run)
        .timeout(Duration::from_secs(cli.timeout));
    if let Some(temp_dir) = cli.temp_dir {
        builder = builder.temp_dir(temp_dir);
    }
    if let Some(workers) = cli.workers {
        builder = builder.workers(workers);
    }
    if let Some(user) = cli.user {
        builder = builder.user(user);
    }

    let report = Reconciler::new(builder.build()?)?.run()?;

    if !report.is_clean() {
        println!(
            "{} {} fetch, {} unpack, {} purge and {} check failures",
            "Warning:".yellow().bold(),
            report.fetch_failed,
            report.unpack_failed,
            report.purge_failed,
            report.check_failed
        );
    }
    Ok(())
}
