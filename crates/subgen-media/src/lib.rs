//! FFmpeg CLI wrapper for the subgen pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with cancellation and timeouts
//! - Media probing and input admission
//! - Fixed-interval segment extraction with resume and size adaptation
//! - Scratch directory partitioning per job

pub mod command;
pub mod error;
pub mod probe;
pub mod scratch;
pub mod segmenter;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_media, AdmissionPolicy};
pub use scratch::ScratchDir;
pub use segmenter::{file_checksum, plan_segments, SegmentPlan, Segmenter, SegmenterConfig};
