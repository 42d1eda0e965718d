//! Worker error types and fault classification.

use subgen_models::FaultKind;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Input rejected: {0}")]
    InvalidInput(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Model call failed: {0}")]
    ModelFailed(String),

    #[error("Model quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Model output unparseable: {0}")]
    ModelOutputInvalid(String),

    #[error("Quality below threshold: {0}")]
    QualityBelowThreshold(String),

    #[error("Merged cues violate structural invariants: {0}")]
    StructuralInvariant(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] subgen_storage::StorageError),

    #[error("Store error: {0}")]
    Store(#[from] subgen_store::StoreError),

    #[error("Media error: {0}")]
    Media(#[from] subgen_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn model_failed(msg: impl Into<String>) -> Self {
        Self::ModelFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Classify this error into the fault taxonomy the scheduler's
    /// policy table is keyed by.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            WorkerError::InvalidInput(_) => FaultKind::InvalidInput,
            WorkerError::AuthFailed(_) | WorkerError::ConfigError(_) => FaultKind::AuthFault,
            WorkerError::QuotaExhausted(_) => FaultKind::QuotaExceeded,
            WorkerError::ModelOutputInvalid(_) => FaultKind::ModelOutputInvalid,
            WorkerError::QualityBelowThreshold(_) => FaultKind::QualityBelowThreshold,
            WorkerError::StructuralInvariant(_) => FaultKind::StructuralInvariant,
            WorkerError::Cancelled => FaultKind::Cancelled,
            WorkerError::Media(subgen_media::MediaError::InputRejected(_))
            | WorkerError::Media(subgen_media::MediaError::FileNotFound(_))
            | WorkerError::Media(subgen_media::MediaError::FfmpegNotFound)
            | WorkerError::Media(subgen_media::MediaError::FfprobeNotFound) => {
                FaultKind::InvalidInput
            }
            WorkerError::Media(subgen_media::MediaError::DiskExhausted(_)) => {
                FaultKind::DiskExhausted
            }
            WorkerError::Media(subgen_media::MediaError::Cancelled) => FaultKind::Cancelled,
            WorkerError::Storage(e) if e.is_fatal() => FaultKind::AuthFault,
            _ => FaultKind::TransientIo,
        }
    }
}
