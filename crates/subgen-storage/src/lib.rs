//! Object-store adapter for the subgen pipeline.
//!
//! Segments are uploaded into a per-job namespace of an S3-compatible
//! bucket. All operations carry timeouts and bounded retries; the
//! `BlobStore` trait is the seam the scheduler programs against.

pub mod client;
pub mod error;
pub mod retry;

pub use client::{BlobStore, S3BlobStore, S3Config};
pub use error::{StorageError, StorageResult};
pub use retry::BackoffPolicy;
