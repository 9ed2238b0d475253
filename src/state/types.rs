//! Types shared by the channel registry and the progress ledger.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A configured source (chat + topic) paired with a destination folder path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Signed chat id as Telegram reports it (`-100…` for supergroups).
    pub chat_id: i64,
    /// Forum topic id. `0` selects the whole chat.
    pub topic_id: i64,
    /// Slash-separated folder path in remote storage.
    pub destination_path: String,
    #[serde(default)]
    pub description: String,
}

impl Channel {
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.chat_id, self.topic_id)
    }
}

/// Ledger namespace for one `(chat_id, topic_id)` pair.
///
/// Encoded as `"{chat_id}_{topic_id}"`. Decimal integers never contain `_` and
/// `-` can only lead the chat id, so the encoding is injective; [`ChannelKey::parse`]
/// is its inverse and only accepts the canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(chat_id: i64, topic_id: i64) -> Self {
        Self(format!("{}_{}", chat_id, topic_id))
    }

    /// Recover the `(chat_id, topic_id)` pair from a key string.
    ///
    /// Returns `None` for anything [`ChannelKey::new`] would not have produced,
    /// e.g. `"+5_3"` or `"05_3"`.
    pub fn parse(s: &str) -> Option<(i64, i64)> {
        let (chat, topic) = s.split_once('_')?;
        let chat_id: i64 = chat.parse().ok()?;
        let topic_id: i64 = topic.parse().ok()?;
        (Self::new(chat_id, topic_id).0 == s).then_some((chat_id, topic_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let key = ChannelKey::new(-1001234567890, 4);
        assert_eq!(key.as_str(), "-1001234567890_4");
        assert_eq!(key.to_string(), "-1001234567890_4");
    }

    #[test]
    fn test_key_roundtrip_and_injectivity() {
        let pairs = [(-1001234567890, 4), (-100123456789, 14), (12, 34), (123, 4), (-1, 0)];
        let keys: Vec<ChannelKey> = pairs.iter().map(|&(c, t)| ChannelKey::new(c, t)).collect();
        for (key, pair) in keys.iter().zip(pairs) {
            assert_eq!(ChannelKey::parse(key.as_str()), Some(pair));
        }
        // (12, 34) and (123, 4) would collide under plain concatenation
        assert_ne!(keys[2], keys[3]);
    }

    #[test]
    fn test_parse_rejects_non_canonical() {
        assert_eq!(ChannelKey::parse("+5_3"), None);
        assert_eq!(ChannelKey::parse("05_3"), None);
        assert_eq!(ChannelKey::parse("5_3_1"), None);
        assert_eq!(ChannelKey::parse("53"), None);
        assert_eq!(ChannelKey::parse(""), None);
    }

    #[test]
    fn test_channel_key_from_channel() {
        let channel = Channel {
            chat_id: -1002406265529,
            topic_id: 4,
            destination_path: "Archive/Talks".into(),
            description: String::new(),
        };
        assert_eq!(channel.key(), ChannelKey::new(-1002406265529, 4));
    }

    #[test]
    fn test_channel_description_defaults_when_absent() {
        let channel: Channel = serde_json::from_str(
            r#"{"chat_id": -1001, "topic_id": 2, "destination_path": "A/B"}"#,
        )
        .unwrap();
        assert_eq!(channel.description, "");
    }
}
