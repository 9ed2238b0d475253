use std::path::PathBuf;

use thiserror::Error;

use crate::retry::Transient;

/// Failures of the storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Cannot read token file {path}: {source}")]
    TokenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid token file {path}: {source}")]
    TokenParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("OAuth token refresh failed (HTTP {status}): {body}")]
    TokenRefresh { status: u16, body: String },

    #[error("{operation} failed with HTTP {status}: {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation}: unexpected response ({what})")]
    MalformedResponse {
        operation: &'static str,
        what: String,
    },

    #[error("{operation}: {source}")]
    Http {
        operation: &'static str,
        source: reqwest::Error,
    },

    #[error("Cannot read {path}: {source}")]
    LocalFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid folder path {0:?}")]
    InvalidPath(String),
}

fn transient_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

impl Transient for StorageError {
    fn is_retryable(&self) -> bool {
        match self {
            StorageError::Api { status, .. } | StorageError::TokenRefresh { status, .. } => {
                transient_status(*status)
            }
            StorageError::Http { .. } => true,
            StorageError::TokenFile { .. }
            | StorageError::TokenParse { .. }
            | StorageError::MalformedResponse { .. }
            | StorageError::LocalFile { .. }
            | StorageError::InvalidPath(_) => false,
        }
    }
}
