//! Job store error types.

use subgen_models::JobId;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur against the durable job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} already exists")]
    AlreadyExists { id: JobId },

    #[error("Job record corrupt (canonical and backup unreadable): {id}")]
    Corrupt { id: JobId },

    #[error("Job {id} has unknown schema version {found} (expected {expected})")]
    UnknownSchema { id: JobId, found: u32, expected: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
