//! Turning a shareable topic link into a registry entry.

use thiserror::Error;
use url::Url;

/// Offset Telegram adds to supergroup and channel ids in the Bot/MTProto API.
const SUPERGROUP_PREFIX: i64 = -1_000_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("Not a Telegram link: {0}")]
    Invalid(String),

    #[error("Public username links are not supported, use a t.me/c/<chat>/<topic> link: {0}")]
    Unsupported(String),

    #[error("Link does not name a topic: {0}")]
    MissingTopic(String),

    #[error("Folder name must not be empty")]
    EmptyName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLink {
    pub chat_id: i64,
    pub topic_id: i64,
}

/// Parse `https://t.me/c/<chat>/<topic>[/<message>]` into a chat/topic pair.
///
/// The scheme may be omitted, and `telegram.me` is accepted as host.
pub fn parse_link(link: &str) -> Result<ChannelLink, LinkError> {
    let trimmed = link.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&with_scheme).map_err(|_| LinkError::Invalid(link.to_string()))?;

    match url.host_str() {
        Some("t.me") | Some("telegram.me") | Some("www.t.me") => {}
        _ => return Err(LinkError::Invalid(link.to_string())),
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        ["c", chat, topic, ..] => {
            let bare: i64 = chat
                .parse()
                .ok()
                .filter(|id: &i64| *id > 0)
                .ok_or_else(|| LinkError::Invalid(link.to_string()))?;
            let topic_id: i64 = topic
                .parse()
                .ok()
                .filter(|id: &i64| *id > 0)
                .ok_or_else(|| LinkError::MissingTopic(link.to_string()))?;
            let chat_id = SUPERGROUP_PREFIX
                .checked_sub(bare)
                .ok_or_else(|| LinkError::Invalid(link.to_string()))?;
            Ok(ChannelLink { chat_id, topic_id })
        }
        ["c", _] | ["c"] => Err(LinkError::MissingTopic(link.to_string())),
        [_username, ..] => Err(LinkError::Unsupported(link.to_string())),
        [] => Err(LinkError::Invalid(link.to_string())),
    }
}

/// `"<root>/<name>"`, with surrounding whitespace and slashes removed from both.
pub fn destination_path(root: &str, name: &str) -> Result<String, LinkError> {
    let name = name.trim().trim_matches('/').trim();
    if name.is_empty() {
        return Err(LinkError::EmptyName);
    }
    let root = root.trim().trim_matches('/').trim();
    if root.is_empty() {
        Ok(name.to_string())
    } else {
        Ok(format!("{}/{}", root, name))
    }
}

pub fn description(name: &str, link: &str) -> String {
    format!("{} ({})", name.trim(), link.trim())
}
