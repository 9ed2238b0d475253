//! [`MessageSource`] backed by a live MTProto user session.
//!
//! The session is a grammers session file authorized beforehand with
//! `tgdrive-rs login`. Chats are resolved through the account's dialogs, so
//! only chats the account has joined can be swept.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use grammers_client::types::{Downloadable, Media};
use grammers_client::{Client, Config, InitParams, InvocationError, SignInError};
use grammers_session::{PackedChat, Session};
use grammers_tl_types as tl;

use super::topic::{bare_chat_id, select_topic, Threaded};
use super::{
    Attachment, AttachmentMeta, ChatHandle, Message, MessageSource, MessageStream, SourceError,
};

/// Connection settings for a user session.
#[derive(Clone)]
pub struct TelegramConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub session_file: PathBuf,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("session_file", &self.session_file)
            .finish()
    }
}

pub struct LiveTelegram {
    config: TelegramConfig,
    client: Option<Client>,
    chats: Mutex<HashMap<i64, PackedChat>>,
}

/// A listed message plus the reply link used to place it in a topic.
struct Listed {
    reply_to: Option<i64>,
    topic_root: bool,
    message: Message,
}

impl Threaded for Listed {
    fn thread_id(&self) -> i64 {
        self.message.id
    }

    fn reply_to(&self) -> Option<i64> {
        self.reply_to
    }

    fn is_topic_root(&self) -> bool {
        self.topic_root
    }
}

impl Listed {
    fn from_remote(message: &grammers_client::types::Message) -> Self {
        let attachment = match message.media() {
            Some(Media::Document(doc)) => {
                document_attachment(doc.mime_type(), doc.name(), doc.size())
            }
            _ => Attachment::None,
        };
        Self {
            reply_to: message.reply_to_message_id().map(i64::from),
            topic_root: matches!(
                message.action(),
                Some(tl::enums::MessageAction::TopicCreate(_))
            ),
            message: Message {
                id: i64::from(message.id()),
                date: Some(message.date()),
                attachment,
            },
        }
    }
}

/// Describe a document attachment. Telegram always sends documents with a
/// MIME type; the file name attribute is optional.
fn document_attachment(mime_type: Option<&str>, file_name: &str, size: i64) -> Attachment {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext));
    Attachment::Document(AttachmentMeta {
        mime_type: mime_type.filter(|m| !m.is_empty()).map(str::to_string),
        extension,
        size: u64::try_from(size).ok(),
    })
}

/// FLOOD_WAIT (420) and server-side failures (5xx) clear up on their own.
fn rpc_code_is_retryable(code: i32) -> bool {
    code == 420 || code >= 500
}

fn invocation_failed(operation: &'static str, e: InvocationError) -> SourceError {
    let retryable = match &e {
        InvocationError::Rpc(rpc) => rpc_code_is_retryable(rpc.code),
        // Transport failures: the sender reconnects on the next request.
        _ => true,
    };
    SourceError::Telegram {
        operation,
        detail: e.to_string(),
        retryable,
    }
}

fn login_failed(operation: &'static str, e: impl Display) -> SourceError {
    SourceError::Telegram {
        operation,
        detail: e.to_string(),
        retryable: false,
    }
}

impl LiveTelegram {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: None,
            chats: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self) -> Result<&Client, SourceError> {
        self.client.as_ref().ok_or(SourceError::NotConnected)
    }

    fn packed(&self, chat: &ChatHandle) -> Result<PackedChat, SourceError> {
        self.chats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat.remote_id)
            .copied()
            .ok_or(SourceError::ChatNotFound(chat.chat_id))
    }

    fn save_session(&self) -> Result<(), SourceError> {
        let client = self.client()?;
        client
            .session()
            .save_to_file(&self.config.session_file)
            .map_err(|e| SourceError::io(&self.config.session_file, e))
    }

    /// Interactive sign-in that leaves an authorized session file behind.
    ///
    /// `read_code` supplies the login code Telegram sends to the account;
    /// `read_password` is only asked when the account has two-step
    /// verification enabled and receives the password hint.
    pub async fn login(
        &self,
        phone: &str,
        read_code: impl FnOnce() -> std::io::Result<String>,
        read_password: impl FnOnce(Option<&str>) -> std::io::Result<String>,
    ) -> Result<(), SourceError> {
        let client = self.client()?;
        let token = client
            .request_login_code(phone)
            .await
            .map_err(|e| login_failed("login code request", e))?;
        let code = read_code().map_err(|e| SourceError::Other(e.into()))?;

        match client.sign_in(&token, code.trim()).await {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(password_token)) => {
                let password = read_password(password_token.hint())
                    .map_err(|e| SourceError::Other(e.into()))?;
                client
                    .check_password(password_token, password)
                    .await
                    .map_err(|e| login_failed("password check", e))?;
            }
            Err(e) => return Err(login_failed("sign-in", e)),
        }

        self.save_session()?;
        tracing::info!(
            "Session saved to {}",
            self.config.session_file.display()
        );
        Ok(())
    }

    async fn topic_history(
        &self,
        chat: &ChatHandle,
        topic_id: i64,
    ) -> Result<Vec<Message>, SourceError> {
        let client = self.client()?;
        let packed = self.packed(chat)?;

        // History pages newest first; topic selection needs it in id order.
        let mut history = client.iter_messages(packed);
        let mut listed = Vec::new();
        while let Some(message) = history
            .next()
            .await
            .map_err(|e| invocation_failed("message listing", e))?
        {
            listed.push(Listed::from_remote(&message));
        }
        tracing::debug!(
            chat_id = chat.chat_id,
            listed = listed.len(),
            "Listed chat history"
        );

        Ok(select_topic(listed, topic_id)
            .into_iter()
            .map(|l| l.message)
            .collect())
    }
}

#[async_trait]
impl MessageSource for LiveTelegram {
    async fn connect(&mut self) -> Result<(), SourceError> {
        let path = &self.config.session_file;
        let session =
            Session::load_file_or_create(path).map_err(|e| SourceError::io(path, e))?;
        let client = Client::connect(Config {
            session,
            api_id: self.config.api_id,
            api_hash: self.config.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|e| login_failed("connect", e))?;
        tracing::info!("Connected to Telegram using {}", path.display());
        self.client = Some(client);
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool, SourceError> {
        self.client()?
            .is_authorized()
            .await
            .map_err(|e| invocation_failed("authorization check", e))
    }

    async fn resolve_chat(&self, chat_id: i64) -> Result<ChatHandle, SourceError> {
        let client = self.client()?;
        let bare = bare_chat_id(chat_id);

        let mut dialogs = client.iter_dialogs();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|e| invocation_failed("dialog listing", e))?
        {
            let chat = dialog.chat();
            if chat.id() != bare {
                continue;
            }
            self.chats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(bare, chat.pack());
            return Ok(ChatHandle {
                chat_id,
                remote_id: bare,
                title: Some(chat.name().to_string()),
            });
        }
        Err(SourceError::ChatNotFound(chat_id))
    }

    fn messages<'a>(&'a self, chat: &'a ChatHandle, topic_id: i64) -> MessageStream<'a> {
        stream::once(self.topic_history(chat, topic_id))
            .flat_map(|listed| {
                let items: Vec<Result<Message, SourceError>> = match listed {
                    Ok(messages) => messages.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .boxed()
    }

    async fn fetch_attachment(
        &self,
        chat: &ChatHandle,
        message_id: i64,
        dest: &Path,
    ) -> Result<u64, SourceError> {
        let client = self.client()?;
        let packed = self.packed(chat)?;
        let not_found = || SourceError::MessageNotFound {
            chat_id: chat.chat_id,
            message_id,
        };
        let id = i32::try_from(message_id).map_err(|_| not_found())?;

        let message = client
            .get_messages_by_id(packed, &[id])
            .await
            .map_err(|e| invocation_failed("message lookup", e))?
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(not_found)?;
        let media = message
            .media()
            .ok_or_else(|| SourceError::AttachmentUnavailable {
                message_id,
                reason: "message has no media".to_string(),
            })?;

        client
            .download_media(&Downloadable::Media(media), dest)
            .await
            .map_err(|e| SourceError::io(dest, e))?;
        let written = tokio::fs::metadata(dest)
            .await
            .map_err(|e| SourceError::io(dest, e))?;
        Ok(written.len())
    }

    async fn disconnect(&mut self) {
        if self.client.is_none() {
            return;
        }
        if let Err(e) = self.save_session() {
            tracing::warn!("Could not save Telegram session: {}", e);
        }
        self.client = None;
        tracing::debug!("Disconnected from Telegram");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::topic::GENERAL_TOPIC_ID;

    fn listed(id: i64, reply_to: Option<i64>, topic_root: bool) -> Listed {
        Listed {
            reply_to,
            topic_root,
            message: Message {
                id,
                date: None,
                attachment: Attachment::None,
            },
        }
    }

    #[test]
    fn test_history_selected_oldest_first() {
        // As paged by the client: newest first.
        let history = vec![
            listed(21, Some(20), false),
            listed(20, Some(7), false),
            listed(9, None, false),
            listed(8, Some(7), false),
            listed(7, None, true),
        ];
        let ids: Vec<i64> = select_topic(history, 7)
            .into_iter()
            .map(|l| l.message.id)
            .collect();
        assert_eq!(ids, vec![7, 8, 20, 21]);
    }

    #[test]
    fn test_general_topic_excludes_topic_threads() {
        let history = vec![
            listed(8, Some(7), false),
            listed(7, None, true),
            listed(2, None, false),
        ];
        let ids: Vec<i64> = select_topic(history, GENERAL_TOPIC_ID)
            .into_iter()
            .map(|l| l.message.id)
            .collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_document_attachment_metadata() {
        assert_eq!(
            document_attachment(Some("video/mp4"), "Lecture 3.MP4", 4096),
            Attachment::Document(AttachmentMeta {
                mime_type: Some("video/mp4".into()),
                extension: Some(".MP4".into()),
                size: Some(4096),
            })
        );
    }

    #[test]
    fn test_document_attachment_without_name_or_mime() {
        assert_eq!(
            document_attachment(Some(""), "", -1),
            Attachment::Document(AttachmentMeta::default())
        );
    }

    #[test]
    fn test_flood_wait_and_server_errors_are_retryable() {
        assert!(rpc_code_is_retryable(420));
        assert!(rpc_code_is_retryable(500));
        assert!(!rpc_code_is_retryable(400));
        assert!(!rpc_code_is_retryable(401));
    }

    #[test]
    fn test_debug_hides_api_hash() {
        let config = TelegramConfig {
            api_id: 7,
            api_hash: "0123abcd".into(),
            session_file: PathBuf::from("tg.session"),
        };
        let shown = format!("{:?}", config);
        assert!(!shown.contains("0123abcd"));
        assert!(shown.contains("tg.session"));
    }

    #[tokio::test]
    async fn test_operations_before_connect() {
        let source = LiveTelegram::new(TelegramConfig {
            api_id: 1,
            api_hash: "hash".into(),
            session_file: PathBuf::from("unused.session"),
        });
        assert!(matches!(
            source.is_authorized().await,
            Err(SourceError::NotConnected)
        ));
        assert!(matches!(
            source.resolve_chat(-1001234567890).await,
            Err(SourceError::NotConnected)
        ));
        let chat = ChatHandle {
            chat_id: -1001234567890,
            remote_id: 1234567890,
            title: None,
        };
        let dest = PathBuf::from("never-written");
        assert!(matches!(
            source.fetch_attachment(&chat, 5, &dest).await,
            Err(SourceError::NotConnected)
        ));
        let listed: Vec<_> = source.messages(&chat, 4).collect().await;
        assert!(matches!(listed.as_slice(), [Err(SourceError::NotConnected)]));
    }
}
