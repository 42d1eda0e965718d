//! Shared data models for the subgen pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, stages, and segments
//! - Subtitle cues with SRT/VTT parsing and rendering
//! - Timestamp arithmetic and the merge algebra
//! - Structural quality metrics

pub mod cue;
pub mod fault;
pub mod job;
pub mod merge;
pub mod quality;
pub mod timestamp;

// Re-export common types
pub use cue::{parse_cue_text, render_srt, render_vtt, Cue, CueParseError};
pub use fault::FaultKind;
pub use job::{
    ErrorRecord, JobId, JobStage, JobState, MediaInfo, OutputPair, Segment, TargetTrack,
    TrackMode, UnitKey, SCHEMA_VERSION,
};
pub use merge::{merge_segments, MergeReport, SegmentWindow};
pub use quality::{analyze_cues, quality_report, CueMetrics};
pub use timestamp::{format_srt_timestamp, format_vtt_timestamp, parse_srt_timestamp, TimestampError};
