//! Durable job record and stage machine data.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fault::FaultKind;

/// Current schema version of the durable job record. Records with any
/// other version are refused on load.
pub const SCHEMA_VERSION: u32 = 1;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subtitle track variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackMode {
    /// Plain dialogue track
    #[default]
    Standard,
    /// Accessibility variant with non-speech audio transcribed
    Sdh,
}

impl TrackMode {
    /// Filename suffix fragment; empty for the standard track.
    pub fn suffix(&self) -> &'static str {
        match self {
            TrackMode::Standard => "",
            TrackMode::Sdh => "_sdh",
        }
    }
}

/// One requested output track: a language code plus variant flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetTrack {
    /// ISO 639 language code, e.g. `eng`
    pub language: String,
    #[serde(default)]
    pub mode: TrackMode,
}

impl TargetTrack {
    pub fn new(language: impl Into<String>, mode: TrackMode) -> Self {
        Self {
            language: language.into(),
            mode,
        }
    }

    /// Track key used in filenames and attempt maps, e.g. `eng` or
    /// `eng_sdh`.
    pub fn key(&self) -> String {
        format!("{}{}", self.language, self.mode.suffix())
    }
}

impl fmt::Display for TargetTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Key for one unit of generation work: a segment paired with a target
/// track. Serialized as `"<segment>:<language>[_sdh]"` so it can key a
/// JSON map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitKey {
    pub segment: u32,
    pub track: TargetTrack,
}

impl UnitKey {
    pub fn new(segment: u32, track: TargetTrack) -> Self {
        Self { segment, track }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.track)
    }
}

/// Probed media metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration_s: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Video codec name
    pub video_codec: String,
    /// Audio codec name, absent when the source has no audio stream
    pub audio_codec: Option<String>,
    /// File size in bytes
    pub size_bytes: u64,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }

    pub fn duration_ms(&self) -> u64 {
        crate::timestamp::seconds_to_ms(self.duration_s)
    }
}

/// A contiguous interval of the source extracted as an independent clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// 0-based index in time order
    pub index: u32,
    /// Start offset in the source, seconds with millisecond precision
    pub start_s: f64,
    /// Segment duration in seconds
    pub duration_s: f64,
    /// Extracted clip path in the job's scratch partition
    pub local_path: PathBuf,
    /// Remote object key, set once uploaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_key: Option<String>,
    /// SHA-256 of the clip bytes, recorded at extraction
    pub checksum: String,
    /// Clip size in bytes
    pub size_bytes: u64,
}

impl Segment {
    pub fn start_ms(&self) -> u64 {
        crate::timestamp::seconds_to_ms(self.start_s)
    }

    pub fn duration_ms(&self) -> u64 {
        crate::timestamp::seconds_to_ms(self.duration_s)
    }
}

/// Most recent fault recorded on a job. Context must not carry secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: FaultKind,
    pub message: String,
    /// Component that raised the fault, e.g. `segmenter`
    pub component: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ErrorRecord {
    pub fn new(kind: FaultKind, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            component: component.into(),
            at: Utc::now(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Emitted file pair for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPair {
    pub srt: PathBuf,
    pub vtt: PathBuf,
}

/// Pipeline stage of a job. Stages only advance forward; the scheduler
/// may rewind a target to `Uploaded` on a quality retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    /// Created, not yet admitted
    #[default]
    New,
    /// Media probed and admitted
    Probed,
    /// All segments extracted
    Segmented,
    /// All segment blobs present in the store
    Uploaded,
    /// Every (segment, track) unit has a cue result
    Generated,
    /// Per-track merged sequences assembled
    Merged,
    /// Quality gate accepted every track
    Checked,
    /// Output files written
    Emitted,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
    /// Terminal operator abandonment
    Abandoned,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::New => "new",
            JobStage::Probed => "probed",
            JobStage::Segmented => "segmented",
            JobStage::Uploaded => "uploaded",
            JobStage::Generated => "generated",
            JobStage::Merged => "merged",
            JobStage::Checked => "checked",
            JobStage::Emitted => "emitted",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
            JobStage::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStage::Completed | JobStage::Failed | JobStage::Abandoned
        )
    }

    /// Next stage in the forward pipeline order; `None` for terminal
    /// stages.
    pub fn next(&self) -> Option<JobStage> {
        match self {
            JobStage::New => Some(JobStage::Probed),
            JobStage::Probed => Some(JobStage::Segmented),
            JobStage::Segmented => Some(JobStage::Uploaded),
            JobStage::Uploaded => Some(JobStage::Generated),
            JobStage::Generated => Some(JobStage::Merged),
            JobStage::Merged => Some(JobStage::Checked),
            JobStage::Checked => Some(JobStage::Emitted),
            JobStage::Emitted => Some(JobStage::Completed),
            JobStage::Completed | JobStage::Failed | JobStage::Abandoned => None,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable job record. The scheduler is the single writer; every
/// other component receives transient copies and returns pure results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    /// Record schema version, checked on load
    pub schema_version: u32,

    /// Unique job ID
    pub id: JobId,

    /// Local source video path
    pub source_path: PathBuf,

    /// Requested output tracks, deduplicated, in request order
    pub targets: Vec<TargetTrack>,

    /// Current pipeline stage
    #[serde(default)]
    pub stage: JobStage,

    /// Attempts per (segment, track) generation unit
    #[serde(default)]
    pub attempt_counts: BTreeMap<String, u32>,

    /// Probed metadata, present from `Probed` onward
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaInfo>,

    /// Extracted segments in time order
    #[serde(default)]
    pub segments: Vec<Segment>,

    /// Indices of segments whose blobs are present in the store
    #[serde(default)]
    pub uploaded: BTreeSet<u32>,

    /// Per-unit cue text file, relative to the job scratch partition,
    /// keyed by `UnitKey` string
    #[serde(default)]
    pub per_chunk_results: BTreeMap<String, PathBuf>,

    /// Emitted output files keyed by track key
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputPair>,

    /// Most recent fault; earlier faults are not retained
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,

    /// Per-job prefix in the object store
    pub reserved_blob_namespace: String,

    /// Set when terminal cleanup could not delete remote blobs and the
    /// reaper should retry on its next sweep
    #[serde(default)]
    pub cleanup_pending: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Completion timestamp for terminal jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobState {
    /// Create a new job for a source file and target set.
    pub fn new(source_path: impl Into<PathBuf>, targets: Vec<TargetTrack>) -> Self {
        let id = JobId::new();
        let now = Utc::now();
        let namespace = format!("jobs/{}", id);

        let mut deduped: Vec<TargetTrack> = Vec::new();
        for t in targets {
            if !deduped.contains(&t) {
                deduped.push(t);
            }
        }

        Self {
            schema_version: SCHEMA_VERSION,
            id,
            source_path: source_path.into(),
            targets: deduped,
            stage: JobStage::New,
            attempt_counts: BTreeMap::new(),
            media: None,
            segments: Vec::new(),
            uploaded: BTreeSet::new(),
            per_chunk_results: BTreeMap::new(),
            outputs: BTreeMap::new(),
            last_error: None,
            reserved_blob_namespace: namespace,
            cleanup_pending: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// File stem of the source, used for output naming.
    pub fn basename(&self) -> String {
        self.source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Advance to a stage, stamping `updated_at` and, for terminal
    /// stages, `completed_at`.
    pub fn advance(&mut self, stage: JobStage) {
        self.stage = stage;
        self.updated_at = Utc::now();
        if stage.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    /// Record a fault as the job's most recent error.
    pub fn record_error(&mut self, error: ErrorRecord) {
        self.last_error = Some(error);
        self.updated_at = Utc::now();
    }

    /// All (segment, track) units for the current segment list.
    pub fn unit_keys(&self) -> Vec<UnitKey> {
        let mut keys = Vec::with_capacity(self.segments.len() * self.targets.len());
        for segment in &self.segments {
            for track in &self.targets {
                keys.push(UnitKey::new(segment.index, track.clone()));
            }
        }
        keys
    }

    /// Units that do not yet have a generation result.
    pub fn pending_units(&self) -> Vec<UnitKey> {
        self.unit_keys()
            .into_iter()
            .filter(|k| !self.per_chunk_results.contains_key(&k.to_string()))
            .collect()
    }

    /// Attempts consumed so far for a unit.
    pub fn attempts(&self, key: &UnitKey) -> u32 {
        self.attempt_counts
            .get(&key.to_string())
            .copied()
            .unwrap_or(0)
    }

    /// Count one attempt against a unit, returning the new count.
    pub fn bump_attempts(&mut self, key: &UnitKey) -> u32 {
        let count = self.attempt_counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Whether every segment index is present in `uploaded`.
    pub fn all_uploaded(&self) -> bool {
        !self.segments.is_empty()
            && self
                .segments
                .iter()
                .all(|s| self.uploaded.contains(&s.index))
    }

    /// Drop the generation results for a target so its chunks are
    /// regenerated. `segments` limits the rewind to specific segment
    /// indices; `None` clears every chunk of the target.
    pub fn clear_track_results(&mut self, track: &TargetTrack, segments: Option<&[u32]>) {
        let keys: Vec<String> = self
            .per_chunk_results
            .keys()
            .filter(|k| {
                let Some((seg, tr)) = k.split_once(':') else {
                    return false;
                };
                if tr != track.key() {
                    return false;
                }
                match segments {
                    Some(wanted) => seg
                        .parse::<u32>()
                        .map(|s| wanted.contains(&s))
                        .unwrap_or(false),
                    None => true,
                }
            })
            .cloned()
            .collect();
        for k in keys {
            self.per_chunk_results.remove(&k);
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eng() -> TargetTrack {
        TargetTrack::new("eng", TrackMode::Standard)
    }

    fn ben_sdh() -> TargetTrack {
        TargetTrack::new("ben", TrackMode::Sdh)
    }

    fn segment(index: u32, start_s: f64, duration_s: f64) -> Segment {
        Segment {
            index,
            start_s,
            duration_s,
            local_path: PathBuf::from(format!("seg_{index:03}.mp4")),
            blob_key: None,
            checksum: format!("sum{index}"),
            size_bytes: 1024,
        }
    }

    #[test]
    fn test_stage_order_is_forward_and_total() {
        let mut stage = JobStage::New;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(stage, JobStage::Completed);
        assert_eq!(seen.len(), 9);
        assert!(JobStage::Failed.next().is_none());
        assert!(JobStage::Abandoned.next().is_none());
    }

    #[test]
    fn test_new_job_dedupes_targets() {
        let job = JobState::new("/videos/talk.mp4", vec![eng(), eng(), ben_sdh()]);
        assert_eq!(job.targets.len(), 2);
        assert_eq!(job.stage, JobStage::New);
        assert_eq!(job.schema_version, SCHEMA_VERSION);
        assert!(job.reserved_blob_namespace.starts_with("jobs/"));
        assert_eq!(job.basename(), "talk");
    }

    #[test]
    fn test_unit_keys_and_pending() {
        let mut job = JobState::new("/videos/talk.mp4", vec![eng(), ben_sdh()]);
        job.segments = vec![segment(0, 0.0, 60.0), segment(1, 60.0, 30.0)];

        let keys = job.unit_keys();
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[0].to_string(), "0:eng");
        assert_eq!(keys[3].to_string(), "1:ben_sdh");

        job.per_chunk_results
            .insert("0:eng".to_string(), PathBuf::from("subs/0_eng.srt"));
        assert_eq!(job.pending_units().len(), 3);
    }

    #[test]
    fn test_attempt_counting() {
        let mut job = JobState::new("/videos/talk.mp4", vec![eng()]);
        let key = UnitKey::new(0, eng());
        assert_eq!(job.attempts(&key), 0);
        assert_eq!(job.bump_attempts(&key), 1);
        assert_eq!(job.bump_attempts(&key), 2);
        assert_eq!(job.attempts(&key), 2);
    }

    #[test]
    fn test_clear_track_results_scoped() {
        let mut job = JobState::new("/videos/talk.mp4", vec![eng(), ben_sdh()]);
        for key in ["0:eng", "1:eng", "0:ben_sdh"] {
            job.per_chunk_results
                .insert(key.to_string(), PathBuf::from("x"));
        }

        job.clear_track_results(&eng(), Some(&[1]));
        assert!(job.per_chunk_results.contains_key("0:eng"));
        assert!(!job.per_chunk_results.contains_key("1:eng"));

        job.clear_track_results(&ben_sdh(), None);
        assert!(!job.per_chunk_results.contains_key("0:ben_sdh"));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut job = JobState::new("/videos/talk.mp4", vec![eng()]);
        job.segments = vec![segment(0, 0.0, 60.0)];
        job.uploaded.insert(0);
        job.record_error(ErrorRecord::new(
            FaultKind::TransientIo,
            "blob",
            "upload flapped",
        ));

        let json = serde_json::to_string(&job).expect("serialize JobState");
        let decoded: JobState = serde_json::from_str(&json).expect("deserialize JobState");
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.segments, job.segments);
        assert_eq!(decoded.last_error.as_ref().unwrap().kind, FaultKind::TransientIo);
    }
}
