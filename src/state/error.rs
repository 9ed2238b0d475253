//! Error types for the persisted state files.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing the registry and ledger files.
#[derive(Error, Debug)]
pub enum StateError {
    /// The file exists but could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file was read but is not a valid record.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The record is written by a newer version of this tool.
    #[error("{path} has format version {found}, newer than supported version {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    /// Writing, syncing or renaming the replacement file failed.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Another process holds the state directory lock.
    #[error("Another tgdrive-rs instance is using the state directory (lock: {path})")]
    Locked { path: PathBuf },
}

impl StateError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
