//! [`MessageSource`] backed by a Telegram Desktop "Export chat history" dump.
//!
//! The export directory holds `result.json` plus the media folders it refers
//! to (`video_files/`, `files/`, ...). Both the single-chat layout and the
//! full-account layout (`chats.list`) are understood.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;

use super::topic::{bare_chat_id, select_topic, Threaded};
use super::{
    Attachment, AttachmentMeta, ChatHandle, Message, MessageSource, MessageStream, SourceError,
};

const EXPORT_FILE: &str = "result.json";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportRoot {
    Account { chats: ChatList },
    Single(ExportChat),
}

#[derive(Debug, Deserialize)]
struct ChatList {
    #[serde(default)]
    list: Vec<ExportChat>,
}

#[derive(Debug, Deserialize)]
struct ExportChat {
    id: i64,
    name: Option<String>,
    #[serde(default)]
    messages: Vec<ExportMessage>,
}

#[derive(Debug, Deserialize)]
struct ExportMessage {
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
    action: Option<String>,
    date: Option<String>,
    /// A string of seconds in current exports; accept a number as well.
    date_unixtime: Option<serde_json::Value>,
    reply_to_message_id: Option<i64>,
    file: Option<String>,
    file_name: Option<String>,
    file_size: Option<u64>,
    media_type: Option<String>,
    mime_type: Option<String>,
}

impl Threaded for &ExportMessage {
    fn thread_id(&self) -> i64 {
        self.id
    }

    fn reply_to(&self) -> Option<i64> {
        self.reply_to_message_id
    }

    fn is_topic_root(&self) -> bool {
        self.kind == "service" && self.action.as_deref() == Some("topic_created")
    }
}

impl ExportMessage {
    /// The exported file path, unless the export left the file out.
    fn exported_file(&self) -> Option<&str> {
        self.file
            .as_deref()
            .filter(|f| !f.is_empty() && !f.starts_with('('))
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        let unix = match &self.date_unixtime {
            Some(serde_json::Value::String(s)) => s.parse::<i64>().ok(),
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            _ => None,
        };
        unix.and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                let date = self.date.as_deref()?;
                NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    fn extension(&self) -> Option<String> {
        self.file_name
            .as_deref()
            .or_else(|| self.exported_file())
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| format!(".{}", ext))
    }

    fn attachment(&self) -> Attachment {
        let meta = || AttachmentMeta {
            mime_type: self.mime_type.clone(),
            extension: self.extension(),
            size: self.file_size,
        };
        match self.media_type.as_deref() {
            Some("video_file" | "video_message") => Attachment::NativeVideo(meta()),
            _ if self.file.is_some() && self.mime_type.is_some() => Attachment::Document(meta()),
            _ => Attachment::None,
        }
    }

    fn to_message(&self) -> Message {
        Message {
            id: self.id,
            date: self.created(),
            attachment: self.attachment(),
        }
    }
}

fn load_export(root: &Path) -> Result<Vec<ExportChat>, SourceError> {
    let path = root.join(EXPORT_FILE);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SourceError::ExportMissing(path))
        }
        Err(e) => return Err(SourceError::io(path, e)),
    };
    let parsed: ExportRoot =
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Parse { path, source: e })?;
    Ok(match parsed {
        ExportRoot::Account { chats } => chats.list,
        ExportRoot::Single(chat) => vec![chat],
    })
}

#[derive(Debug)]
pub struct DesktopExport {
    root: PathBuf,
    chats: Option<Vec<ExportChat>>,
}

impl DesktopExport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chats: None,
        }
    }

    fn find_chat(&self, remote_id: i64) -> Result<&ExportChat, SourceError> {
        self.chats
            .as_deref()
            .ok_or(SourceError::NotConnected)?
            .iter()
            .find(|c| c.id == remote_id)
            .ok_or(SourceError::ChatNotFound(remote_id))
    }
}

#[async_trait]
impl MessageSource for DesktopExport {
    async fn connect(&mut self) -> Result<(), SourceError> {
        let root = self.root.clone();
        let chats = tokio::task::spawn_blocking(move || load_export(&root))
            .await
            .map_err(|e| SourceError::Other(e.into()))??;
        tracing::info!(
            chats = chats.len(),
            "Loaded chat export from {}",
            self.root.display()
        );
        self.chats = Some(chats);
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool, SourceError> {
        Ok(self.chats.as_ref().is_some_and(|c| !c.is_empty()))
    }

    async fn resolve_chat(&self, chat_id: i64) -> Result<ChatHandle, SourceError> {
        let bare = bare_chat_id(chat_id);
        let chat = self
            .chats
            .as_deref()
            .ok_or(SourceError::NotConnected)?
            .iter()
            .find(|c| c.id == bare || c.id == chat_id)
            .ok_or(SourceError::ChatNotFound(chat_id))?;
        Ok(ChatHandle {
            chat_id,
            remote_id: chat.id,
            title: chat.name.clone(),
        })
    }

    fn messages<'a>(&'a self, chat: &'a ChatHandle, topic_id: i64) -> MessageStream<'a> {
        match self.find_chat(chat.remote_id) {
            Ok(export_chat) => {
                let selected: Vec<Result<Message, SourceError>> =
                    select_topic(export_chat.messages.iter().collect(), topic_id)
                        .into_iter()
                        .map(|m| Ok(m.to_message()))
                        .collect();
                stream::iter(selected).boxed()
            }
            Err(e) => stream::iter(vec![Err(e)]).boxed(),
        }
    }

    async fn fetch_attachment(
        &self,
        chat: &ChatHandle,
        message_id: i64,
        dest: &Path,
    ) -> Result<u64, SourceError> {
        let export_chat = self.find_chat(chat.remote_id)?;
        let message = export_chat
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .ok_or(SourceError::MessageNotFound {
                chat_id: chat.chat_id,
                message_id,
            })?;

        let relative = message
            .exported_file()
            .map(Path::new)
            .filter(|p| p.components().all(|c| matches!(c, Component::Normal(_))))
            .ok_or_else(|| SourceError::AttachmentUnavailable {
                message_id,
                reason: match &message.file {
                    Some(f) => format!("file not included in export: {}", f),
                    None => "message has no file".to_string(),
                },
            })?;

        let src = self.root.join(relative);
        match tokio::fs::copy(&src, dest).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::AttachmentUnavailable {
                    message_id,
                    reason: format!("{} is missing from the export", src.display()),
                })
            }
            Err(e) => Err(SourceError::io(src, e)),
        }
    }

    async fn disconnect(&mut self) {
        if self.chats.take().is_some() {
            tracing::debug!("Released chat export {}", self.root.display());
        }
    }
}
