//! One oldest-to-newest pass over a channel's messages.

use futures_util::StreamExt;
use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;

use crate::source::MessageSource;
use crate::state::{Channel, ProgressLedger};
use crate::storage::Storage;

use super::classify::classify;
use super::error::{SweepError, TransferError};
use super::transfer::{TransferExecutor, TransferOptions, TransferOutcome};

/// Per-channel counters. `found` counts every video seen, whatever happened to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub found: u64,
    pub transferred: u64,
    pub skipped: u64,
    pub failed: u64,
    pub already_present: u64,
    /// Stopped early because shutdown was requested.
    pub interrupted: bool,
    /// Stopped early because the message listing failed.
    pub incomplete: bool,
}

impl SweepStats {
    pub fn absorb(&mut self, other: &SweepStats) {
        self.found += other.found;
        self.transferred += other.transferred;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.already_present += other.already_present;
        self.interrupted |= other.interrupted;
        self.incomplete |= other.incomplete;
    }
}

pub struct ChannelSweep<'a, M: ?Sized, S: ?Sized> {
    source: &'a M,
    storage: &'a S,
    options: &'a TransferOptions,
    shutdown: &'a CancellationToken,
    progress: &'a ProgressBar,
}

impl<'a, M, S> ChannelSweep<'a, M, S>
where
    M: MessageSource + ?Sized,
    S: Storage + ?Sized,
{
    pub fn new(
        source: &'a M,
        storage: &'a S,
        options: &'a TransferOptions,
        shutdown: &'a CancellationToken,
        progress: &'a ProgressBar,
    ) -> Self {
        Self {
            source,
            storage,
            options,
            shutdown,
            progress,
        }
    }

    /// Transfer every video of `channel` that the ledger does not know yet.
    ///
    /// Item failures are logged and counted; only failing to resolve the chat
    /// or folder, or a broken listing, ends the sweep with an error.
    pub async fn sweep(
        &self,
        channel: &Channel,
        ledger: &mut ProgressLedger,
    ) -> Result<SweepStats, SweepError> {
        let key = channel.key();
        let chat = self
            .source
            .resolve_chat(channel.chat_id)
            .await
            .map_err(|e| SweepError::ChatResolutionFailed {
                chat_id: channel.chat_id,
                source: e,
            })?;
        let folder = self
            .storage
            .resolve_or_create_folder(&channel.destination_path)
            .await
            .map_err(|e| SweepError::FolderResolutionFailed {
                path: channel.destination_path.clone(),
                source: e,
            })?;
        self.progress.suspend(|| {
            tracing::info!(
                channel = %key,
                folder_id = %folder.id,
                "Sweeping {} topic {} into {}",
                chat.title.as_deref().unwrap_or("chat"),
                channel.topic_id,
                folder.path
            )
        });

        let executor = TransferExecutor::new(self.source, self.storage, self.options);
        let mut stats = SweepStats::default();
        let mut messages = self.source.messages(&chat, channel.topic_id);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    stats.interrupted = true;
                    break;
                }
                next = messages.next() => next,
            };
            let message = match next {
                None => break,
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    stats.incomplete = true;
                    return Err(SweepError::ListingFailed {
                        chat_id: channel.chat_id,
                        source: e,
                        partial: stats,
                    });
                }
            };

            let Some(item) = classify(&message) else {
                continue;
            };
            stats.found += 1;

            if ledger.is_transferred(&key, item.id) {
                stats.skipped += 1;
                self.progress.suspend(|| {
                    tracing::debug!(channel = %key, item_id = item.id, "Already transferred, skipping")
                });
                continue;
            }

            self.progress
                .set_message(format!("{} item {}", key, item.id));
            self.progress.suspend(|| {
                tracing::info!(
                    channel = %key,
                    item_id = item.id,
                    "[{}] {} (date: {}, size: {})",
                    stats.found,
                    item.filename,
                    item.created
                        .map_or_else(|| "unknown".to_string(), |d| d.to_rfc3339()),
                    item.size_mb()
                        .map_or_else(|| "unknown".to_string(), |mb| format!("{:.2} MB", mb))
                )
            });

            match executor
                .transfer(&item, &chat, &folder, &key, ledger)
                .await
            {
                Ok(TransferOutcome::Uploaded { remote_id }) => {
                    stats.transferred += 1;
                    self.progress.suspend(|| {
                        tracing::info!(item_id = item.id, remote_id = %remote_id, "Uploaded {}", item.filename)
                    });
                }
                Ok(TransferOutcome::AlreadyPresent { .. }) => stats.already_present += 1,
                Err(e @ TransferError::LedgerWriteFailed { .. }) => {
                    stats.failed += 1;
                    self.progress.suspend(|| {
                        tracing::error!(
                            channel = %key,
                            item_id = e.item_id(),
                            "{}. It will be uploaded again on the next run unless the ledger is fixed",
                            e
                        )
                    });
                }
                Err(e) => {
                    stats.failed += 1;
                    self.progress.suspend(|| {
                        tracing::warn!(channel = %key, item_id = e.item_id(), "{}", e)
                    });
                }
            }
            self.progress.inc(1);
        }

        if stats.interrupted {
            self.progress.suspend(|| {
                tracing::info!(channel = %key, "Shutdown requested, stopping sweep")
            });
        }
        Ok(stats)
    }
}
