//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during blob operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::DeleteFailed(msg.into())
    }

    /// Auth and permission faults need operator intervention; nothing
    /// else in this enum is worth retrying forever either, but these are
    /// never retried at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::ConfigError(_) | StorageError::AccessDenied(_)
        )
    }

    /// Classify an SDK error message, teasing out permission problems.
    pub(crate) fn from_sdk(operation: &str, message: String) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("accessdenied")
            || lowered.contains("invalidaccesskeyid")
            || lowered.contains("signaturedoesnotmatch")
            || lowered.contains("forbidden")
        {
            return StorageError::AccessDenied(message);
        }
        match operation {
            "put" => StorageError::UploadFailed(message),
            "get" => StorageError::DownloadFailed(message),
            "delete" => StorageError::DeleteFailed(message),
            "list" => StorageError::ListFailed(message),
            _ => StorageError::UploadFailed(message),
        }
    }
}
