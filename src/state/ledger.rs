//! Progress ledger: which items have already been delivered, per channel.
//!
//! The ledger is loaded once at startup and rewritten in full after every
//! single insertion. `mark_transferred` only updates memory after the new
//! document is durably on disk, so the in-memory view never claims more than
//! a crash would preserve.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StateError;
use super::store::{self, Loaded, Versioned};
use super::types::ChannelKey;

pub const LEDGER_FILE: &str = "progress.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerRecord {
    #[serde(default = "current_version")]
    version: u32,
    #[serde(default)]
    last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    channels: BTreeMap<String, BTreeSet<i64>>,
}

fn current_version() -> u32 {
    LedgerRecord::CURRENT_VERSION
}

impl Versioned for LedgerRecord {
    const CURRENT_VERSION: u32 = 1;

    fn version(&self) -> u32 {
        self.version
    }
}

/// Durable set of `(channel key, item id)` pairs that were transferred.
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    channels: BTreeMap<String, BTreeSet<i64>>,
    last_update: Option<DateTime<Utc>>,
    /// Set when the file on disk could not be read; it is moved aside before
    /// the first write instead of being overwritten.
    quarantine_pending: bool,
}

impl ProgressLedger {
    /// Load the ledger at `path`.
    ///
    /// A missing or unreadable file yields an empty ledger; resuming then
    /// degrades to starting over for the lost data instead of failing the run.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut ledger = Self {
            path,
            channels: BTreeMap::new(),
            last_update: None,
            quarantine_pending: false,
        };

        match store::load_record::<LedgerRecord>(&ledger.path) {
            Loaded::Absent => {
                tracing::info!(
                    "No progress ledger at {}, starting from scratch",
                    ledger.path.display()
                );
            }
            Loaded::Record(record) => {
                ledger.channels = record.channels;
                ledger.last_update = record.last_update;
                for key in ledger
                    .channels
                    .keys()
                    .filter(|k| ChannelKey::parse(k).is_none())
                {
                    tracing::warn!(key = %key, "Ledger entry has a malformed channel key and matches no channel");
                }
                tracing::info!(
                    items = ledger.total_items(),
                    channels = ledger.channels.len(),
                    "Loaded progress ledger from {}",
                    ledger.path.display()
                );
            }
            Loaded::Unreadable(e) => {
                tracing::warn!("{}; continuing with an empty progress ledger", e);
                ledger.quarantine_pending = true;
            }
        }

        ledger
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_transferred(&self, key: &ChannelKey, item_id: i64) -> bool {
        self.channels
            .get(key.as_str())
            .is_some_and(|ids| ids.contains(&item_id))
    }

    /// Record `item_id` as transferred and persist before returning.
    ///
    /// On error nothing changes in memory either, so the next run will
    /// re-attempt the item.
    pub fn mark_transferred(&mut self, key: &ChannelKey, item_id: i64) -> Result<(), StateError> {
        if self.is_transferred(key, item_id) {
            return Ok(());
        }

        let now = Utc::now();
        let mut channels = self.channels.clone();
        channels
            .entry(key.as_str().to_string())
            .or_default()
            .insert(item_id);
        let record = LedgerRecord {
            version: LedgerRecord::CURRENT_VERSION,
            last_update: Some(now),
            channels,
        };

        if self.quarantine_pending {
            let moved = store::quarantine(&self.path)?;
            tracing::warn!(
                "Moved unreadable progress ledger to {}",
                moved.display()
            );
            self.quarantine_pending = false;
        }

        store::write_record(&self.path, &record)?;

        self.channels = record.channels;
        self.last_update = record.last_update;
        Ok(())
    }

    /// Number of items recorded for one channel.
    pub fn transferred_count(&self, key: &ChannelKey) -> usize {
        self.channels.get(key.as_str()).map_or(0, BTreeSet::len)
    }

    pub fn total_items(&self) -> usize {
        self.channels.values().map(BTreeSet::len).sum()
    }

    /// Time of the last successful write. Informational only.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }
}
