//! Document formats for dataset descriptors and manifests
//!
//! Both kinds of document are small structured files whose format is picked
//! from the file extension through a closed registry. Unknown extensions
//! fall back to a caller-supplied default.

use crate::error::{Result, SyncError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Structured document formats understood by hdfsync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// JSON via serde_json
    Json,
    /// YAML via serde_yaml
    Yaml,
}

/// Extension to format registry
const FORMAT_REGISTRY: &[(&str, DocumentFormat)] = &[
    ("json", DocumentFormat::Json),
    ("yaml", DocumentFormat::Yaml),
    ("yml", DocumentFormat::Yaml),
];

/// File name endings that mark a dataset descriptor
pub const DESCRIPTOR_SUFFIXES: &[&str] = &["_dataset.yaml", "_dataset.yml", "_dataset.json"];

impl DocumentFormat {
    /// Look up the format registered for a path's extension
    pub fn for_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        FORMAT_REGISTRY
            .iter()
            .find(|(name, _)| *name == ext)
            .map(|(_, format)| *format)
    }

    /// Parse text in this format
    pub fn parse<T: DeserializeOwned>(self, text: &str) -> Result<T> {
        match self {
            DocumentFormat::Json => Ok(serde_json::from_str(text)?),
            DocumentFormat::Yaml => Ok(serde_yaml::from_str(text)?),
        }
    }
}

/// Read and parse a document, choosing the format by extension
pub fn read_document<T: DeserializeOwned>(path: &Path, fallback: DocumentFormat) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| SyncError::path_io(path, e))?;
    DocumentFormat::for_path(path).unwrap_or(fallback).parse(&text)
}

/// Whether a file name matches the dataset descriptor pattern
pub fn is_descriptor_name(name: &str) -> bool {
    DESCRIPTOR_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(cmd) => vec![cmd],
            OneOrMany::Many(cmds) => cmds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    hdfs_path: Option<String>,
    setup_cmd: Option<OneOrMany>,
}

/// A dataset descriptor: which remote manifest to watch and what to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDescriptor {
    /// Remote path of the dataset manifest
    pub hdfs_path: String,
    /// Setup commands, in execution order
    pub setup_cmd: Vec<String>,
}

impl DatasetDescriptor {
    /// Load a descriptor, requiring both `hdfs_path` and `setup_cmd`
    pub fn load(path: &Path) -> Result<Self> {
        let invalid = |reason: String| SyncError::InvalidDescriptor {
            path: path.to_path_buf(),
            reason,
        };

        let raw: RawDescriptor =
            read_document(path, DocumentFormat::Yaml).map_err(|e| invalid(e.to_string()))?;

        let hdfs_path = raw
            .hdfs_path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid("missing field `hdfs_path`".to_string()))?;
        let setup_cmd: Vec<String> = raw
            .setup_cmd
            .ok_or_else(|| invalid("missing field `setup_cmd`".to_string()))?
            .into();

        Ok(Self {
            hdfs_path,
            setup_cmd,
        })
    }
}

/// One file listed in a manifest
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ManifestFile {
    /// Expected size in bytes
    pub size: u64,
}

/// Dataset manifest: relative path to expected size
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// Files making up the dataset
    pub files: BTreeMap<String, ManifestFile>,
}

impl Manifest {
    /// Load a manifest, defaulting to JSON for unregistered extensions
    pub fn load(path: &Path) -> Result<Self> {
        read_document(path, DocumentFormat::Json).map_err(|e| SyncError::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
