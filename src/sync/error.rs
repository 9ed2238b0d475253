use thiserror::Error;

use super::sweep::SweepStats;
use crate::source::SourceError;
use crate::state::StateError;
use crate::storage::StorageError;

/// Failure of a single item. Never escapes its channel sweep.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Fetching item {item_id} failed: {source}")]
    FetchFailed { item_id: i64, source: SourceError },

    #[error("Uploading item {item_id} failed: {source}")]
    UploadFailed { item_id: i64, source: StorageError },

    /// The upload went through but the ledger does not know about it.
    #[error(
        "Item {item_id} was uploaded (remote id {remote_id}) but recording it in the progress ledger failed: {source}"
    )]
    LedgerWriteFailed {
        item_id: i64,
        remote_id: String,
        source: StateError,
    },
}

impl TransferError {
    pub fn item_id(&self) -> i64 {
        match self {
            TransferError::FetchFailed { item_id, .. }
            | TransferError::UploadFailed { item_id, .. }
            | TransferError::LedgerWriteFailed { item_id, .. } => *item_id,
        }
    }
}

/// Failure that ends one channel's sweep early. Other channels still run.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Cannot resolve chat {chat_id}: {source}")]
    ChatResolutionFailed { chat_id: i64, source: SourceError },

    #[error("Cannot resolve destination folder {path:?}: {source}")]
    FolderResolutionFailed { path: String, source: StorageError },

    #[error("Listing messages of chat {chat_id} failed: {source}")]
    ListingFailed {
        chat_id: i64,
        source: SourceError,
        /// Counters accumulated before the listing broke off.
        partial: SweepStats,
    },
}

impl SweepError {
    /// Whatever was accomplished before the failure.
    pub fn partial_stats(&self) -> SweepStats {
        match self {
            SweepError::ListingFailed { partial, .. } => *partial,
            _ => SweepStats::default(),
        }
    }
}

/// Failure that aborts the whole run before any ledger write.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Could not open the message source: {0}")]
    Connect(#[source] SourceError),

    #[error("Message source session is not authorized")]
    AuthFailed,
}
