//! In-memory collaborators for pipeline tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::source::{
    Attachment, AttachmentMeta, ChatHandle, Message, MessageSource, MessageStream, SourceError,
};
use crate::storage::{FolderHandle, Storage, StorageError};

pub fn video_message(id: i64) -> Message {
    Message {
        id,
        date: None,
        attachment: Attachment::NativeVideo(AttachmentMeta {
            mime_type: Some("video/mp4".into()),
            extension: Some(".mp4".into()),
            size: Some(1024),
        }),
    }
}

pub fn text_message(id: i64) -> Message {
    Message {
        id,
        date: None,
        attachment: Attachment::None,
    }
}

#[derive(Default)]
pub struct FakeSource {
    topics: HashMap<(i64, i64), Vec<Message>>,
    listing_breaks: HashMap<(i64, i64), usize>,
    failing_fetches: HashSet<i64>,
    stalled_fetches: HashSet<i64>,
    unauthorized: bool,
    connect_fails: bool,
    connected: bool,
    fetched: Mutex<Vec<PathBuf>>,
    disconnects: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, chat_id: i64, topic_id: i64, messages: Vec<Message>) -> Self {
        self.topics.insert((chat_id, topic_id), messages);
        self
    }

    pub fn failing_fetch(mut self, message_id: i64) -> Self {
        self.failing_fetches.insert(message_id);
        self
    }

    /// Fetching `message_id` never completes.
    pub fn stalling_fetch(mut self, message_id: i64) -> Self {
        self.stalled_fetches.insert(message_id);
        self
    }

    /// Yield `after` messages of the topic, then a listing error.
    pub fn failing_listing_after(mut self, chat_id: i64, topic_id: i64, after: usize) -> Self {
        self.listing_breaks.insert((chat_id, topic_id), after);
        self
    }

    pub fn unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.connect_fails = true;
        self
    }

    /// Scratch paths handed to `fetch_attachment`, in call order.
    pub fn fetch_destinations(&self) -> Vec<PathBuf> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        if self.connect_fails {
            return Err(SourceError::ExportMissing(PathBuf::from("/nonexistent")));
        }
        self.connected = true;
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool, SourceError> {
        Ok(self.connected && !self.unauthorized)
    }

    async fn resolve_chat(&self, chat_id: i64) -> Result<ChatHandle, SourceError> {
        if self.topics.keys().any(|(chat, _)| *chat == chat_id) {
            Ok(ChatHandle {
                chat_id,
                remote_id: chat_id,
                title: Some(format!("chat {}", chat_id)),
            })
        } else {
            Err(SourceError::ChatNotFound(chat_id))
        }
    }

    fn messages<'a>(&'a self, chat: &'a ChatHandle, topic_id: i64) -> MessageStream<'a> {
        let key = (chat.chat_id, topic_id);
        let messages = self.topics.get(&key).cloned().unwrap_or_default();
        let mut items: Vec<Result<Message, SourceError>> = messages.into_iter().map(Ok).collect();
        if let Some(&after) = self.listing_breaks.get(&key) {
            items.truncate(after);
            items.push(Err(SourceError::io(
                "result.json",
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "listing broke off"),
            )));
        }
        stream::iter(items).boxed()
    }

    async fn fetch_attachment(
        &self,
        _chat: &ChatHandle,
        message_id: i64,
        dest: &Path,
    ) -> Result<u64, SourceError> {
        self.fetched.lock().unwrap().push(dest.to_path_buf());
        if self.failing_fetches.contains(&message_id) {
            return Err(SourceError::AttachmentUnavailable {
                message_id,
                reason: "test failure".into(),
            });
        }
        if self.stalled_fetches.contains(&message_id) {
            std::future::pending::<()>().await;
        }
        let payload = format!("payload-{}", message_id);
        tokio::fs::write(dest, payload.as_bytes())
            .await
            .map_err(|e| SourceError::io(dest, e))?;
        Ok(payload.len() as u64)
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub name: String,
    pub mime_type: String,
    pub folder_id: String,
    pub content: Vec<u8>,
}

#[derive(Default)]
pub struct FakeStorage {
    uploads: Mutex<Vec<RecordedUpload>>,
    folders: Mutex<Vec<String>>,
    failing_uploads: HashSet<String>,
    failing_folders: HashSet<String>,
    existing: HashMap<String, String>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_upload(mut self, name: &str) -> Self {
        self.failing_uploads.insert(name.to_string());
        self
    }

    pub fn failing_folder(mut self, path: &str) -> Self {
        self.failing_folders.insert(path.to_string());
        self
    }

    pub fn with_existing(mut self, name: &str, remote_id: &str) -> Self {
        self.existing.insert(name.to_string(), remote_id.to_string());
        self
    }

    /// Cancel `token` once `uploads` uploads have completed.
    pub fn cancel_after_uploads(mut self, uploads: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((uploads, token));
        self
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.uploads().into_iter().map(|u| u.name).collect()
    }

    pub fn resolved_folders(&self) -> Vec<String> {
        self.folders.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for FakeStorage {
    async fn resolve_or_create_folder(&self, path: &str) -> Result<FolderHandle, StorageError> {
        if self.failing_folders.contains(path) {
            return Err(StorageError::Api {
                operation: "Folder lookup",
                status: 403,
                body: "forbidden".into(),
            });
        }
        let mut folders = self.folders.lock().unwrap();
        folders.push(path.to_string());
        Ok(FolderHandle {
            id: format!("folder-{}", folders.len()),
            path: path.to_string(),
        })
    }

    async fn find_file(
        &self,
        _parent: &FolderHandle,
        name: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(self.existing.get(name).cloned())
    }

    async fn upload(
        &self,
        local_path: &Path,
        name: &str,
        mime_type: &str,
        parent: &FolderHandle,
    ) -> Result<String, StorageError> {
        if self.failing_uploads.contains(name) {
            return Err(StorageError::Api {
                operation: "Upload",
                status: 400,
                body: "rejected".into(),
            });
        }
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::LocalFile {
                path: local_path.to_path_buf(),
                source: e,
            })?;

        let count = {
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push(RecordedUpload {
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                folder_id: parent.id.clone(),
                content,
            });
            uploads.len()
        };
        if let Some((after, token)) = &self.cancel_after {
            if count >= *after {
                token.cancel();
            }
        }
        Ok(format!("remote-{}", count))
    }
}
