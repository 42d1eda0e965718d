//! End-to-end pipeline tests against in-memory backends.
//!
//! The fakes stand in for the external collaborators (media tools, the
//! object store, the generative model, the translation scorer); the
//! store, scratch space, merge algebra, quality gate, and scheduler
//! logic under test are the real implementations.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use subgen_media::plan_segments;
use subgen_models::{
    format_srt_timestamp, parse_cue_text, FaultKind, JobStage, JobState, MediaInfo, Segment,
    TargetTrack, TrackMode, UnitKey,
};
use subgen_storage::{BlobStore, StorageResult};
use subgen_store::JobStore;
use subgen_worker::context::{MediaBackend, PipelineContext};
use subgen_worker::error::{WorkerError, WorkerResult};
use subgen_worker::model::{GenerationRequest, SubtitleModel};
use subgen_worker::prompts::PromptRegistry;
use subgen_worker::quality::{TranslationScorer, TranslationScores};
use subgen_worker::{pipeline, reaper, JobExecutor, WorkerConfig};

// ---------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------

struct FakeMedia {
    info: MediaInfo,
    chunk_duration_s: f64,
    probe_calls: AtomicU32,
    extract_calls: AtomicU32,
}

impl FakeMedia {
    fn new(duration_s: f64, has_audio: bool) -> Self {
        Self {
            info: MediaInfo {
                duration_s,
                width: 1920,
                height: 1080,
                fps: 30.0,
                video_codec: "h264".to_string(),
                audio_codec: has_audio.then(|| "aac".to_string()),
                size_bytes: 4_000_000,
            },
            chunk_duration_s: 60.0,
            probe_calls: AtomicU32::new(0),
            extract_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl MediaBackend for FakeMedia {
    async fn probe(&self, _path: &Path) -> WorkerResult<MediaInfo> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.info.clone())
    }

    async fn extract_segments(
        &self,
        _source: &Path,
        segments_dir: &Path,
        media: &MediaInfo,
        _existing: &[Segment],
    ) -> WorkerResult<Vec<Segment>> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);

        let plan = plan_segments(media.duration_s, self.chunk_duration_s);
        let mut segments = Vec::new();
        for (i, interval) in plan.iter().enumerate() {
            let path = segments_dir.join(format!("seg_{i:03}.mp4"));
            tokio::fs::write(&path, format!("clip-{i}")).await?;
            segments.push(Segment {
                index: i as u32,
                start_s: interval.start_s,
                duration_s: interval.duration_s,
                local_path: path,
                blob_key: None,
                checksum: format!("sum-{i}"),
                size_bytes: 1_000,
            });
        }
        Ok(segments)
    }
}

#[derive(Default)]
struct FakeBlobs {
    /// full key -> checksum
    objects: std::sync::Mutex<HashMap<String, String>>,
    put_calls: std::sync::Mutex<Vec<String>>,
}

impl FakeBlobs {
    fn seed(&self, full_key: &str, checksum: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(full_key.to_string(), checksum.to_string());
    }

    fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn put_count(&self) -> usize {
        self.put_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        _local_path: &Path,
        checksum: &str,
    ) -> StorageResult<String> {
        let full_key = format!("{namespace}/{key}");
        let mut objects = self.objects.lock().unwrap();
        if objects.get(&full_key).map(String::as_str) != Some(checksum) {
            self.put_calls.lock().unwrap().push(full_key.clone());
            objects.insert(full_key.clone(), checksum.to_string());
        }
        Ok(full_key)
    }

    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let full_key = format!("{namespace}/{key}");
        Ok(self.objects.lock().unwrap().contains_key(&full_key))
    }

    async fn delete_prefix(&self, namespace: &str) -> StorageResult<u32> {
        let prefix = format!("{namespace}/");
        let mut objects = self.objects.lock().unwrap();
        let keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &keys {
            objects.remove(key);
        }
        Ok(keys.len() as u32)
    }
}

struct ScriptedModel {
    /// Segment durations in ms, indexed by segment number
    durations_ms: Vec<u64>,
    /// Calls per (blob_ref, track) unit
    calls: std::sync::Mutex<HashMap<String, u32>>,
    /// Units whose first call returns a quota fault
    quota_units: std::sync::Mutex<HashSet<String>>,
    /// Segment whose output includes a cue past the segment end
    overrun_segment: Option<u32>,
}

impl ScriptedModel {
    fn new(durations_ms: Vec<u64>) -> Self {
        Self {
            durations_ms,
            calls: std::sync::Mutex::new(HashMap::new()),
            quota_units: std::sync::Mutex::new(HashSet::new()),
            overrun_segment: None,
        }
    }

    fn with_quota_on(self, unit: &str) -> Self {
        self.quota_units.lock().unwrap().insert(unit.to_string());
        self
    }

    fn with_overrun(mut self, segment: u32) -> Self {
        self.overrun_segment = Some(segment);
        self
    }

    fn unit_key(request: &GenerationRequest) -> String {
        let segment = segment_index(&request.blob_ref);
        format!("{}:{}", segment, request.track.key())
    }

    fn calls_for(&self, unit: &str) -> u32 {
        self.calls.lock().unwrap().get(unit).copied().unwrap_or(0)
    }
}

fn segment_index(blob_ref: &str) -> u32 {
    let name = blob_ref.rsplit('/').next().unwrap_or_default();
    name.trim_start_matches("seg_")
        .trim_end_matches(".mp4")
        .parse()
        .expect("blob ref carries a segment index")
}

fn scripted_srt(duration_ms: u64, segment: u32, overrun: bool) -> String {
    let mut out = String::new();
    let mut n = 1u32;
    let mut t = 0u64;
    while t + 1_900 <= duration_ms {
        out.push_str(&format!(
            "{n}\n{} --> {}\nLine {n} of segment {segment}.\n\n",
            format_srt_timestamp(t),
            format_srt_timestamp(t + 1_900),
        ));
        t += 2_000;
        n += 1;
    }
    if overrun {
        out.push_str(&format!(
            "{n}\n{} --> {}\nRuns past the boundary.\n\n",
            format_srt_timestamp(duration_ms.saturating_sub(500)),
            format_srt_timestamp(duration_ms + 250),
        ));
    }
    out
}

#[async_trait]
impl SubtitleModel for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> WorkerResult<String> {
        let unit = Self::unit_key(request);
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(unit.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if call == 1 && self.quota_units.lock().unwrap().contains(&unit) {
            return Err(WorkerError::QuotaExhausted("scripted quota".to_string()));
        }

        let segment = segment_index(&request.blob_ref);
        let duration = self.durations_ms[segment as usize];
        let overrun = self.overrun_segment == Some(segment);
        Ok(scripted_srt(duration, segment, overrun))
    }

    fn identifier(&self) -> &str {
        "scripted-model"
    }
}

struct ScriptedScorer {
    scores: std::sync::Mutex<VecDeque<(f64, f64)>>,
}

impl ScriptedScorer {
    fn new(scores: Vec<(f64, f64)>) -> Self {
        Self {
            scores: std::sync::Mutex::new(scores.into()),
        }
    }
}

#[async_trait]
impl TranslationScorer for ScriptedScorer {
    async fn score(
        &self,
        _cues: &[subgen_models::Cue],
        _source: &str,
        _target: &str,
    ) -> WorkerResult<TranslationScores> {
        let (quality, cultural) = self
            .scores
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((0.9, 0.9));
        Ok(TranslationScores { quality, cultural })
    }
}

// ---------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------

struct Harness {
    ctx: PipelineContext,
    media: Arc<FakeMedia>,
    blobs: Arc<FakeBlobs>,
    model: Arc<ScriptedModel>,
    _shutdown_tx: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

async fn harness(
    media: FakeMedia,
    model: ScriptedModel,
    scorer: ScriptedScorer,
    source_language: Option<&str>,
) -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let config = WorkerConfig {
        temp_dir: dir.path().join("scratch"),
        output_dir: dir.path().join("output"),
        job_store_dir: dir.path().join("jobs"),
        quota_cooldown: std::time::Duration::from_millis(20),
        source_language: source_language.map(str::to_string),
        ..WorkerConfig::default()
    };

    let store = JobStore::open(&config.job_store_dir).await.unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let media = Arc::new(media);
    let blobs = Arc::new(FakeBlobs::default());
    let model = Arc::new(model);

    let ctx = PipelineContext::with_backends(
        config,
        store,
        Arc::clone(&media) as Arc<dyn MediaBackend>,
        Arc::clone(&blobs) as Arc<dyn BlobStore>,
        Arc::clone(&model) as Arc<dyn SubtitleModel>,
        PromptRegistry::builtin(),
        Arc::new(scorer),
        shutdown_rx,
    );

    Harness {
        ctx,
        media,
        blobs,
        model,
        _shutdown_tx: shutdown_tx,
        _dir: dir,
    }
}

fn eng() -> TargetTrack {
    TargetTrack::new("eng", TrackMode::Standard)
}

fn ben() -> TargetTrack {
    TargetTrack::new("ben", TrackMode::Standard)
}

async fn new_job(h: &Harness, targets: Vec<TargetTrack>) -> JobState {
    let job = JobState::new("/videos/talk.mp4", targets);
    h.ctx.store.create(&job).await.unwrap();
    job
}

// ---------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------

/// Happy path, single language: 125 s source, 60 s chunks.
#[tokio::test]
async fn happy_path_single_language() {
    let h = harness(
        FakeMedia::new(125.0, true),
        ScriptedModel::new(vec![60_000, 60_000, 5_000]),
        ScriptedScorer::new(vec![]),
        None,
    )
    .await;

    let mut job = new_job(&h, vec![eng()]).await;
    pipeline::drive_job(&h.ctx, &mut job).await.unwrap();

    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(job.segments.len(), 3);
    let durations: Vec<f64> = job.segments.iter().map(|s| s.duration_s).collect();
    assert_eq!(durations, vec![60.0, 60.0, 5.0]);

    // Sum of segment durations equals the media duration.
    let total: f64 = durations.iter().sum();
    assert!((total - 125.0).abs() < 0.001);

    // Both output forms exist and the merged cues stay within bounds.
    let pair = job.outputs.get("eng").expect("eng output recorded");
    let srt = std::fs::read_to_string(&pair.srt).unwrap();
    assert!(pair.vtt.exists());

    let cues = parse_cue_text(&srt).unwrap();
    assert!(!cues.is_empty());
    assert!(cues.last().unwrap().end_ms <= 125_000);
    for pair in cues.windows(2) {
        assert!(pair[1].start_ms >= pair[0].end_ms);
    }

    // Cleanup releases the blob namespace and the scratch partition.
    reaper::cleanup_job(&h.ctx, &mut job).await.unwrap();
    assert_eq!(h.blobs.object_count(), 0);
    assert!(!h.ctx.scratch.job_dir(&job.id).exists());

    // The durable record survives cleanup.
    let reloaded = h.ctx.store.load(&job.id).await.unwrap();
    assert_eq!(reloaded.stage, JobStage::Completed);
}

/// Resume after crash mid-upload: segments 0 and 1 already uploaded,
/// only segment 2 is pushed on restart.
#[tokio::test]
async fn resume_after_crash_mid_upload() {
    let h = harness(
        FakeMedia::new(180.0, true),
        ScriptedModel::new(vec![60_000, 60_000, 60_000]),
        ScriptedScorer::new(vec![]),
        None,
    )
    .await;

    let mut job = new_job(&h, vec![eng()]).await;

    // State as a crashed run left it: stage Segmented, two blobs up.
    job.media = Some(h.media.info.clone());
    h.ctx.scratch.ensure(&job.id).await.unwrap();
    let segments_dir = h.ctx.scratch.segments_dir(&job.id);
    job.segments = h
        .media
        .extract_segments(Path::new("/videos/talk.mp4"), &segments_dir, &h.media.info, &[])
        .await
        .unwrap();

    for index in [0u32, 1] {
        let key = format!(
            "{}/segments/seg_{index:05}.mp4",
            job.reserved_blob_namespace
        );
        h.blobs.seed(&key, &format!("sum-{index}"));
        job.segments[index as usize].blob_key = Some(key);
        job.uploaded.insert(index);
    }
    job.advance(JobStage::Segmented);
    h.ctx.store.save(&job).await.unwrap();

    let mut job = h.ctx.store.load(&job.id).await.unwrap();
    assert_eq!(job.stage, JobStage::Segmented);
    assert_eq!(job.uploaded.len(), 2);

    pipeline::drive_job(&h.ctx, &mut job).await.unwrap();

    assert_eq!(job.stage, JobStage::Completed);
    // No duplicate uploads of segments 0 or 1.
    assert_eq!(h.blobs.put_count(), 1);
    assert!(h.ctx.store.load(&job.id).await.unwrap().all_uploaded());
}

/// Quality retry then accept: first pass scores 0.65, chunks regenerate,
/// second pass scores 0.78.
#[tokio::test]
async fn quality_retry_then_accept() {
    let h = harness(
        FakeMedia::new(90.0, true),
        ScriptedModel::new(vec![60_000, 30_000]),
        ScriptedScorer::new(vec![(0.65, 0.9), (0.78, 0.9)]),
        Some("eng"),
    )
    .await;

    let mut job = new_job(&h, vec![ben()]).await;
    pipeline::drive_job(&h.ctx, &mut job).await.unwrap();

    assert_eq!(job.stage, JobStage::Completed);

    // Exactly two model calls per affected chunk.
    assert_eq!(h.model.calls_for("0:ben"), 2);
    assert_eq!(h.model.calls_for("1:ben"), 2);

    // One attempt consumed per unit of the affected target.
    assert_eq!(job.attempts(&UnitKey::new(0, ben())), 1);
    assert_eq!(job.attempts(&UnitKey::new(1, ben())), 1);
}

/// Quota pause: the affected unit is re-queued after the cooldown with
/// no attempt consumed.
#[tokio::test]
async fn quota_pause_requeues_without_attempt() {
    let h = harness(
        FakeMedia::new(125.0, true),
        ScriptedModel::new(vec![60_000, 60_000, 5_000]).with_quota_on("1:eng"),
        ScriptedScorer::new(vec![]),
        None,
    )
    .await;

    let mut job = new_job(&h, vec![eng()]).await;
    pipeline::drive_job(&h.ctx, &mut job).await.unwrap();

    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(h.model.calls_for("1:eng"), 2);
    assert_eq!(job.attempts(&UnitKey::new(1, eng())), 0);
    // The other units went through on their first call.
    assert_eq!(h.model.calls_for("0:eng"), 1);
    assert_eq!(h.model.calls_for("2:eng"), 1);
}

/// Structural clip: a cue ending 250 ms past its segment is clipped to
/// the boundary and the job still completes.
#[tokio::test]
async fn overrunning_cue_is_clipped() {
    let h = harness(
        FakeMedia::new(125.0, true),
        ScriptedModel::new(vec![60_000, 60_000, 5_000]).with_overrun(1),
        ScriptedScorer::new(vec![]),
        None,
    )
    .await;

    let mut job = new_job(&h, vec![eng()]).await;
    pipeline::drive_job(&h.ctx, &mut job).await.unwrap();

    assert_eq!(job.stage, JobStage::Completed);

    let pair = job.outputs.get("eng").unwrap();
    let cues = parse_cue_text(&std::fs::read_to_string(&pair.srt).unwrap()).unwrap();

    // Nothing from segment 1 leaks past its window (60s..120s).
    for cue in &cues {
        assert!(cue.end_ms <= 125_000);
    }
    assert!(cues.iter().all(|c| c.end_ms != 120_250));
    for pair in cues.windows(2) {
        assert!(pair[1].start_ms >= pair[0].end_ms, "overlap after merge");
    }
}

/// Fatal input: a source without an audio stream is rejected before any
/// segmentation or upload happens.
#[tokio::test]
async fn missing_audio_fails_fast() {
    let h = harness(
        FakeMedia::new(125.0, false),
        ScriptedModel::new(vec![]),
        ScriptedScorer::new(vec![]),
        None,
    )
    .await;

    let mut job = new_job(&h, vec![eng()]).await;
    pipeline::drive_job(&h.ctx, &mut job).await.unwrap();

    assert_eq!(job.stage, JobStage::Failed);
    let error = job.last_error.as_ref().expect("error recorded");
    assert_eq!(error.kind, FaultKind::InvalidInput);
    assert!(error.message.contains("audio"));

    assert_eq!(h.media.extract_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.blobs.object_count(), 0);
    assert!(job.outputs.is_empty());
}

/// Re-running a completed pipeline is bit-stable on the subtitle files.
#[tokio::test]
async fn rerun_produces_identical_output_bytes() {
    let make = || async {
        let h = harness(
            FakeMedia::new(125.0, true),
            ScriptedModel::new(vec![60_000, 60_000, 5_000]),
            ScriptedScorer::new(vec![]),
            None,
        )
        .await;
        let mut job = new_job(&h, vec![eng()]).await;
        pipeline::drive_job(&h.ctx, &mut job).await.unwrap();
        let pair = job.outputs.get("eng").unwrap();
        (
            std::fs::read(&pair.srt).unwrap(),
            std::fs::read(&pair.vtt).unwrap(),
        )
    };

    let (srt_a, vtt_a) = make().await;
    let (srt_b, vtt_b) = make().await;
    assert_eq!(srt_a, srt_b);
    assert_eq!(vtt_a, vtt_b);
}

/// Executor surface: submit creates a durable record, abandon releases
/// resources and marks the job terminal.
#[tokio::test]
async fn submit_and_abandon() {
    let h = harness(
        FakeMedia::new(60.0, true),
        ScriptedModel::new(vec![60_000]),
        ScriptedScorer::new(vec![]),
        None,
    )
    .await;

    let (tx, _rx) = watch::channel(false);
    let executor = JobExecutor::from_context(h.ctx, tx);

    let id = executor
        .submit("/videos/talk.mp4", vec![eng()])
        .await
        .unwrap();
    assert_eq!(
        executor.context().store.load(&id).await.unwrap().stage,
        JobStage::New
    );

    executor.abandon(&id).await.unwrap();
    let job = executor.context().store.load(&id).await.unwrap();
    assert_eq!(job.stage, JobStage::Abandoned);
    assert_eq!(job.last_error.as_ref().unwrap().kind, FaultKind::Cancelled);

    // Abandoning twice is a no-op.
    executor.abandon(&id).await.unwrap();

    // Empty target sets are refused up front.
    assert!(executor.submit("/videos/talk.mp4", vec![]).await.is_err());
}
