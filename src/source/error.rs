use std::path::PathBuf;

use thiserror::Error;

use crate::retry::Transient;

/// Failures of the messaging collaborator.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("No chat export found at {0}")]
    ExportMissing(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse chat export {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Message source is not connected")]
    NotConnected,

    #[error("Chat {0} not found")]
    ChatNotFound(i64),

    #[error("Message {message_id} not found in chat {chat_id}")]
    MessageNotFound { chat_id: i64, message_id: i64 },

    #[error("Attachment of message {message_id} is unavailable: {reason}")]
    AttachmentUnavailable { message_id: i64, reason: String },

    #[error("Telegram {operation} failed: {detail}")]
    Telegram {
        operation: &'static str,
        detail: String,
        retryable: bool,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SourceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl Transient for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            SourceError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
            ),
            SourceError::Telegram { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
