//! Moves one item from the message source to storage and records it.

use std::path::{Path, PathBuf};

use crate::retry::{classify, retry_with_backoff, RetryConfig};
use crate::source::{ChatHandle, MessageSource, SourceError};
use crate::state::{ChannelKey, ProgressLedger};
use crate::storage::{FolderHandle, Storage};

use super::classify::Item;
use super::error::TransferError;

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Directory for scratch files. Each transfer gets its own uniquely named file.
    pub scratch_dir: PathBuf,
    /// Retries for fetching from the source. Storage calls retry on their own.
    pub retry: RetryConfig,
    /// Look for an existing file with the canonical name before uploading.
    pub check_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Uploaded { remote_id: String },
    /// The destination already had the file; only the ledger was updated.
    AlreadyPresent { remote_id: String },
}

pub struct TransferExecutor<'a, M: ?Sized, S: ?Sized> {
    source: &'a M,
    storage: &'a S,
    options: &'a TransferOptions,
}

impl<'a, M, S> TransferExecutor<'a, M, S>
where
    M: MessageSource + ?Sized,
    S: Storage + ?Sized,
{
    pub fn new(source: &'a M, storage: &'a S, options: &'a TransferOptions) -> Self {
        Self {
            source,
            storage,
            options,
        }
    }

    /// Fetch, upload, then record `item` in the ledger.
    ///
    /// The item is recorded only after the upload returned a remote id, and
    /// the scratch file is gone when this returns or is dropped.
    pub async fn transfer(
        &self,
        item: &Item,
        chat: &ChatHandle,
        folder: &FolderHandle,
        key: &ChannelKey,
        ledger: &mut ProgressLedger,
    ) -> Result<TransferOutcome, TransferError> {
        if self.options.check_existing {
            if let Some(remote_id) = self.existing_copy(item, folder).await? {
                tracing::info!(
                    item_id = item.id,
                    remote_id = %remote_id,
                    "{} is already in {}, recording without upload",
                    item.filename,
                    folder.path
                );
                commit(ledger, key, item, &remote_id)?;
                return Ok(TransferOutcome::AlreadyPresent { remote_id });
            }
        }

        // TempPath deletes the file on drop, so every early return and a
        // cancelled future clean up too.
        let scratch = tempfile::Builder::new()
            .prefix("tgdrive-")
            .suffix(item.extension())
            .tempfile_in(&self.options.scratch_dir)
            .map_err(|e| TransferError::FetchFailed {
                item_id: item.id,
                source: SourceError::io(&self.options.scratch_dir, e),
            })?
            .into_temp_path();
        let path: &Path = &scratch;

        let bytes = retry_with_backoff(&self.options.retry, "Fetch", classify, || {
            self.source.fetch_attachment(chat, item.id, path)
        })
        .await
        .map_err(|e| TransferError::FetchFailed {
            item_id: item.id,
            source: e,
        })?;
        tracing::debug!(item_id = item.id, bytes, "Staged attachment in {}", path.display());

        // Storage resumes and retries inside one upload session; a second
        // session after a failure could leave a duplicate behind.
        let remote_id = self
            .storage
            .upload(path, &item.filename, &item.mime_type, folder)
            .await
            .map_err(|e| TransferError::UploadFailed {
                item_id: item.id,
                source: e,
            })?;

        commit(ledger, key, item, &remote_id)?;

        if let Err(e) = scratch.close() {
            tracing::warn!(item_id = item.id, "Failed to remove scratch file: {}", e);
        }
        Ok(TransferOutcome::Uploaded { remote_id })
    }

    async fn existing_copy(
        &self,
        item: &Item,
        folder: &FolderHandle,
    ) -> Result<Option<String>, TransferError> {
        self.storage
            .find_file(folder, &item.filename)
            .await
            .map_err(|e| TransferError::UploadFailed {
                item_id: item.id,
                source: e,
            })
    }
}

fn commit(
    ledger: &mut ProgressLedger,
    key: &ChannelKey,
    item: &Item,
    remote_id: &str,
) -> Result<(), TransferError> {
    ledger
        .mark_transferred(key, item.id)
        .map_err(|e| TransferError::LedgerWriteFailed {
            item_id: item.id,
            remote_id: remote_id.to_string(),
            source: e,
        })
}
