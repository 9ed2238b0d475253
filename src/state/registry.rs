//! Channel registry: the ordered list of configured source→destination mappings.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::StateError;
use super::store::{self, Loaded, Versioned};
use super::types::Channel;

pub const REGISTRY_FILE: &str = "channels.json";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(
        "Channel {chat_id}/{topic_id} is already registered (destination: {destination_path})"
    )]
    DuplicateChannel {
        chat_id: i64,
        topic_id: i64,
        destination_path: String,
    },

    #[error(transparent)]
    Persist(#[from] StateError),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryRecord {
    #[serde(default = "current_version")]
    version: u32,
    #[serde(default)]
    channels: Vec<Channel>,
}

fn current_version() -> u32 {
    RegistryRecord::CURRENT_VERSION
}

impl Versioned for RegistryRecord {
    const CURRENT_VERSION: u32 = 1;

    fn version(&self) -> u32 {
        self.version
    }
}

#[derive(Debug)]
pub struct ChannelRegistry {
    path: PathBuf,
    channels: Vec<Channel>,
    quarantine_pending: bool,
}

impl ChannelRegistry {
    /// Load the registry. Absent or unreadable storage yields an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (channels, quarantine_pending) = match store::load_record::<RegistryRecord>(&path) {
            Loaded::Absent => {
                tracing::debug!("No channel registry at {}", path.display());
                (Vec::new(), false)
            }
            Loaded::Record(record) => (dedup(record.channels), false),
            Loaded::Unreadable(e) => {
                tracing::error!("{}; treating the channel registry as empty", e);
                (Vec::new(), true)
            }
        };

        Self {
            path,
            channels,
            quarantine_pending,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Channels in registration order.
    pub fn list(&self) -> &[Channel] {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Append a channel and persist.
    ///
    /// Either both the in-memory list and the file gain the entry or neither does.
    pub fn register(
        &mut self,
        chat_id: i64,
        topic_id: i64,
        destination_path: &str,
        description: &str,
    ) -> Result<&Channel, RegistryError> {
        if let Some(existing) = self
            .channels
            .iter()
            .find(|c| c.chat_id == chat_id && c.topic_id == topic_id)
        {
            return Err(RegistryError::DuplicateChannel {
                chat_id,
                topic_id,
                destination_path: existing.destination_path.clone(),
            });
        }

        let mut channels = self.channels.clone();
        channels.push(Channel {
            chat_id,
            topic_id,
            destination_path: destination_path.to_string(),
            description: description.to_string(),
        });
        let record = RegistryRecord {
            version: RegistryRecord::CURRENT_VERSION,
            channels,
        };

        if self.quarantine_pending {
            let moved = store::quarantine(&self.path)?;
            tracing::warn!("Moved unreadable channel registry to {}", moved.display());
            self.quarantine_pending = false;
        }
        store::write_record(&self.path, &record)?;

        self.channels = record.channels;
        let added = &self.channels[self.channels.len() - 1];
        tracing::info!(
            key = %added.key(),
            destination = %added.destination_path,
            "Registered channel"
        );
        Ok(added)
    }
}

/// Drop hand-edited duplicates, keeping the first registration of each pair.
fn dedup(channels: Vec<Channel>) -> Vec<Channel> {
    let mut seen = HashSet::new();
    channels
        .into_iter()
        .filter(|c| {
            let fresh = seen.insert((c.chat_id, c.topic_id));
            if !fresh {
                tracing::warn!(
                    key = %c.key(),
                    destination = %c.destination_path,
                    "Ignoring duplicate channel entry"
                );
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_registry_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::load(dir.path().join(REGISTRY_FILE));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_persists_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        let mut registry = ChannelRegistry::load(&path);
        registry
            .register(-1001234567890, 4, "Archive/Talks", "talks")
            .unwrap();
        registry
            .register(-1001234567890, 9, "Archive/Q&A", "q&a")
            .unwrap();
        registry.register(-1009, 1, "Other", "").unwrap();

        let reloaded = ChannelRegistry::load(&path);
        let topics: Vec<i64> = reloaded.list().iter().map(|c| c.topic_id).collect();
        assert_eq!(topics, vec![4, 9, 1]);
        assert_eq!(reloaded.list()[1].destination_path, "Archive/Q&A");
        assert_eq!(reloaded.list()[0].description, "talks");
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        let mut registry = ChannelRegistry::load(&path);
        registry.register(-1001, 4, "A", "").unwrap();

        let err = registry.register(-1001, 4, "B", "").unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DuplicateChannel { chat_id: -1001, topic_id: 4, ref destination_path }
                if destination_path == "A"
        ));
        assert_eq!(registry.list().len(), 1);
        assert_eq!(ChannelRegistry::load(&path).list().len(), 1);
    }

    #[test]
    fn test_same_chat_different_topic_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ChannelRegistry::load(dir.path().join(REGISTRY_FILE));
        registry.register(-1001, 4, "A", "").unwrap();
        registry.register(-1001, 5, "A", "").unwrap();
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_failed_persist_leaves_list_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let mut registry = ChannelRegistry::load(blocker.join(REGISTRY_FILE));

        let err = registry.register(-1001, 4, "A", "").unwrap_err();
        assert!(matches!(err, RegistryError::Persist(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unreadable_registry_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        std::fs::write(&path, b"[[[").unwrap();
        let mut registry = ChannelRegistry::load(&path);
        assert!(registry.is_empty());

        registry.register(-1001, 4, "A", "").unwrap();
        assert_eq!(ChannelRegistry::load(&path).list().len(), 1);
        let set_aside = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("channels.json.unreadable-")
            });
        assert!(set_aside);
    }

    #[test]
    fn test_load_drops_duplicate_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        std::fs::write(
            &path,
            br#"{"version": 1, "channels": [
                {"chat_id": -1001, "topic_id": 4, "destination_path": "First"},
                {"chat_id": -1001, "topic_id": 4, "destination_path": "Second"}
            ]}"#,
        )
        .unwrap();
        let registry = ChannelRegistry::load(&path);
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.list()[0].destination_path, "First");
    }
}
