//! Archive recognition and extraction
//!
//! Mirrored files whose names end in a known archive suffix are unpacked
//! into a sibling tree under the unpack root. The suffix table is closed;
//! when several suffixes match, the longest one wins so that `x.tar.gz`
//! resolves to `.tar.gz` and not a shorter tail.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveKind {
    /// PKZIP archive
    Zip,
    /// gzip-compressed tarball
    TarGz,
    /// xz-compressed tarball
    TarXz,
    /// bzip2-compressed tarball
    TarBz2,
}

/// Suffix to archive kind table
pub const ARCHIVE_SUFFIXES: &[(&str, ArchiveKind)] = &[
    (".zip", ArchiveKind::Zip),
    (".txz", ArchiveKind::TarXz),
    (".tar.xz", ArchiveKind::TarXz),
    (".tgz", ArchiveKind::TarGz),
    (".tar.gz", ArchiveKind::TarGz),
    (".tbz2", ArchiveKind::TarBz2),
    (".tar.bz2", ArchiveKind::TarBz2),
];

impl ArchiveKind {
    /// Find the longest archive suffix matching `name`
    pub fn detect(name: &str) -> Option<(&'static str, ArchiveKind)> {
        ARCHIVE_SUFFIXES
            .iter()
            .filter(|(suffix, _)| name.ends_with(suffix))
            .max_by_key(|(suffix, _)| suffix.len())
            .copied()
    }

    /// Extraction command; the archive path is appended as the last argument
    pub fn command(self) -> &'static [&'static str] {
        match self {
            ArchiveKind::Zip => &["unzip", "-qq"],
            ArchiveKind::TarGz => &["tar", "-xzf"],
            ArchiveKind::TarXz => &["tar", "-xJf"],
            ArchiveKind::TarBz2 => &["tar", "-xjf"],
        }
    }

    /// Extract `archive` into the existing directory `into`
    pub fn extract(self, archive: &Path, into: &Path) -> Result<()> {
        let argv = self.command();
        debug!("Extracting {:?} into {:?} with {}", archive, into, argv.join(" "));

        let status = Command::new(argv[0])
            .args(&argv[1..])
            .arg(archive)
            .current_dir(into)
            .status()
            .map_err(|e| SyncError::Extraction {
                path: archive.to_path_buf(),
                reason: format!("cannot run {}: {}", argv[0], e),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(SyncError::Extraction {
                path: archive.to_path_buf(),
                reason: format!("{} exited with {}", argv[0], status),
            })
        }
    }
}
