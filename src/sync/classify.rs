//! Decides which messages are transferable videos.

use chrono::{DateTime, Utc};

use crate::source::{Attachment, Message};

pub const DEFAULT_EXTENSION: &str = ".mp4";
pub const DEFAULT_MIME_TYPE: &str = "video/mp4";

/// A video attachment ready to transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: i64,
    pub size: Option<u64>,
    /// `video_<id><ext>`.
    pub filename: String,
    pub mime_type: String,
    pub created: Option<DateTime<Utc>>,
}

impl Item {
    /// Extension of the canonical filename, including the dot.
    pub fn extension(&self) -> &str {
        self.filename
            .rfind('.')
            .map_or("", |idx| &self.filename[idx..])
    }

    pub fn size_mb(&self) -> Option<f64> {
        self.size.map(|bytes| bytes as f64 / (1024.0 * 1024.0))
    }
}

fn is_video_mime(mime: &str) -> bool {
    mime.trim()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("video/"))
}

/// Classify a message. Pure: no I/O, no allocation beyond the returned item.
pub fn classify(message: &Message) -> Option<Item> {
    let meta = match &message.attachment {
        Attachment::None => return None,
        Attachment::NativeVideo(meta) => meta,
        Attachment::Document(meta) => {
            if !meta.mime_type.as_deref().is_some_and(is_video_mime) {
                return None;
            }
            meta
        }
    };

    let extension = match meta.extension.as_deref().map(str::trim) {
        Some(ext) if ext.starts_with('.') && ext.len() > 1 => ext.to_string(),
        Some(ext) if !ext.is_empty() && !ext.starts_with('.') => format!(".{}", ext),
        _ => DEFAULT_EXTENSION.to_string(),
    };
    let mime_type = meta
        .mime_type
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MIME_TYPE);

    Some(Item {
        id: message.id,
        size: meta.size,
        filename: format!("video_{}{}", message.id, extension),
        mime_type: mime_type.to_string(),
        created: message.date,
    })
}
