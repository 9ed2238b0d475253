//! Storage collaborator: where transferred files end up.

pub mod drive;
pub mod error;

use std::path::Path;

use async_trait::async_trait;

pub use drive::DriveClient;
pub use error::StorageError;

/// A resolved destination folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderHandle {
    pub id: String,
    /// Normalized slash-separated path the handle was resolved from.
    pub path: String,
}

/// Implementations retry transient failures themselves; callers invoke each
/// operation once.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Resolve a slash-separated folder path, creating missing segments.
    async fn resolve_or_create_folder(&self, path: &str) -> Result<FolderHandle, StorageError>;

    /// Id of a file named `name` directly inside `parent`, if any.
    async fn find_file(
        &self,
        parent: &FolderHandle,
        name: &str,
    ) -> Result<Option<String>, StorageError>;

    /// Upload a local file into `parent` and return the new remote file id.
    async fn upload(
        &self,
        local_path: &Path,
        name: &str,
        mime_type: &str,
        parent: &FolderHandle,
    ) -> Result<String, StorageError>;
}
