//! Messaging collaborator: where chat messages and their attachments come from.
//!
//! The sync pipeline only talks to [`MessageSource`]. [`LiveTelegram`] reads a
//! chat through an authorized user session; [`DesktopExport`] reads a Telegram
//! Desktop JSON export for offline runs.

pub mod error;
pub mod export;
pub mod telegram;
mod topic;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;

pub use error::SourceError;
pub use export::DesktopExport;
pub use telegram::{LiveTelegram, TelegramConfig};

/// A resolved chat. `remote_id` is whatever the source uses internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatHandle {
    pub chat_id: i64,
    pub remote_id: i64,
    pub title: Option<String>,
}

/// Metadata declared for an attachment. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub mime_type: Option<String>,
    /// Extension including the leading dot, e.g. `".mkv"`.
    pub extension: Option<String>,
    pub size: Option<u64>,
}

/// What a message carries, decided once when the message is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    None,
    /// Media the source itself marks as video.
    NativeVideo(AttachmentMeta),
    /// A generic file; only its MIME type says what it is.
    Document(AttachmentMeta),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub date: Option<DateTime<Utc>>,
    pub attachment: Attachment,
}

pub type MessageStream<'a> = BoxStream<'a, Result<Message, SourceError>>;

#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn connect(&mut self) -> Result<(), SourceError>;

    async fn is_authorized(&self) -> Result<bool, SourceError>;

    async fn resolve_chat(&self, chat_id: i64) -> Result<ChatHandle, SourceError>;

    /// Messages of one topic, oldest first. `topic_id == 0` selects the whole chat.
    ///
    /// The stream is finite and restarts from the beginning on every call.
    fn messages<'a>(&'a self, chat: &'a ChatHandle, topic_id: i64) -> MessageStream<'a>;

    /// Write the attachment of `message_id` to `dest`, replacing its contents.
    /// Returns the number of bytes written.
    async fn fetch_attachment(
        &self,
        chat: &ChatHandle,
        message_id: i64,
        dest: &Path,
    ) -> Result<u64, SourceError>;

    async fn disconnect(&mut self);
}
